//! Ledger Configuration
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration backed by an in-memory store.

use std::path::{Path, PathBuf};

use lib_types::{Amount, Percentage, DEFAULT_MAX_REFERRAL_DEPTH};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{LedgerError, LedgerResult};
use crate::plans::NewPlan;

/// Environment variable that overrides `[gateway] capture_secret`
pub const CAPTURE_SECRET_ENV: &str = "GOLDSAVE_CAPTURE_SECRET";

/// Complete ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub rates: RateConfig,
    pub referral: ReferralConfig,
    pub retry: RetryConfig,
    pub gateway: GatewayConfig,
    /// Plans created at startup when no plan of the same name exists
    pub plans: Vec<NewPlan>,
}

/// `[store]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite file; `None` keeps the ledger in memory
    pub database_path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            max_connections: lib_storage::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// `[rates]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Rupees per gram used when no rate has been published
    pub fallback_rate: Amount,
    /// How long the latest rate is served from memory
    pub cache_ttl_secs: u64,
    /// Published at startup if the rate table is empty
    pub initial_rate: Option<Amount>,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            fallback_rate: Decimal::from(6500),
            cache_ttl_secs: 60,
            initial_rate: None,
        }
    }
}

/// What to do when a referral would put a member below the depth cap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthPolicy {
    /// Register the referral, keeping only the nearest `max_depth` ancestors
    #[default]
    Truncate,
    /// Refuse the referral with `MaxDepthExceeded`
    Reject,
}

/// One row of the commission table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSeed {
    pub level: u32,
    pub percentage: Percentage,
}

/// `[referral]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub max_depth: u32,
    pub depth_policy: DepthPolicy,
    /// Seeded into the level table at startup; existing rows are overwritten
    pub levels: Vec<LevelSeed>,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        let levels = [(1, 10), (2, 5), (3, 3), (4, 2), (5, 1)]
            .into_iter()
            .map(|(level, pct)| LevelSeed {
                level,
                percentage: Decimal::from(pct),
            })
            .collect();
        Self {
            max_depth: DEFAULT_MAX_REFERRAL_DEPTH,
            depth_policy: DepthPolicy::Truncate,
            levels,
        }
    }
}

/// `[retry]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation on a write conflict, first try included
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff_ms`
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

/// `[gateway]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Shared secret for capture signatures
    pub capture_secret: Option<String>,
}

impl GatewayConfig {
    /// Secret from the environment, falling back to the file
    pub fn resolve_secret(&self) -> Option<String> {
        std::env::var(CAPTURE_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.capture_secret.clone())
    }
}

impl LedgerConfig {
    /// In-memory store, no cache, fast retries, fixed capture secret
    pub fn for_testing() -> Self {
        Self {
            store: StoreConfig::default(),
            rates: RateConfig {
                cache_ttl_secs: 0,
                ..RateConfig::default()
            },
            referral: ReferralConfig::default(),
            retry: RetryConfig {
                max_attempts: 3,
                backoff_ms: 1,
            },
            gateway: GatewayConfig {
                capture_secret: Some("test_capture_secret".to_string()),
            },
            plans: Vec::new(),
        }
    }

    pub fn from_toml_str(content: &str) -> LedgerResult<Self> {
        let config: LedgerConfig =
            toml::from_str(content).map_err(|e| LedgerError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::InvalidInput(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> LedgerResult<()> {
        if self.rates.fallback_rate <= Decimal::ZERO {
            return Err(LedgerError::InvalidInput("rates.fallback_rate must be positive".into()));
        }
        if let Some(rate) = self.rates.initial_rate {
            if rate <= Decimal::ZERO {
                return Err(LedgerError::InvalidInput("rates.initial_rate must be positive".into()));
            }
        }
        if self.referral.max_depth == 0 {
            return Err(LedgerError::InvalidInput("referral.max_depth must be at least 1".into()));
        }
        for seed in &self.referral.levels {
            if seed.level == 0 || seed.level > self.referral.max_depth {
                return Err(LedgerError::InvalidInput(format!(
                    "referral level {} outside 1..={}",
                    seed.level, self.referral.max_depth
                )));
            }
            if seed.percentage < Decimal::ZERO || seed.percentage > Decimal::ONE_HUNDRED {
                return Err(LedgerError::InvalidInput(format!(
                    "referral level {} percentage {} outside 0..=100",
                    seed.level, seed.percentage
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(LedgerError::InvalidInput("retry.max_attempts must be at least 1".into()));
        }
        if self.store.max_connections == 0 {
            return Err(LedgerError::InvalidInput("store.max_connections must be at least 1".into()));
        }
        for plan in &self.plans {
            plan.validate()?;
        }
        Ok(())
    }
}
