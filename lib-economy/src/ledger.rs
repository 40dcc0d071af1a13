//! Savings ledger facade
//!
//! Wires every engine to one store from a [`LedgerConfig`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lib_storage::SqliteBackend;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LedgerConfig;
use crate::errors::{LedgerError, LedgerResult};
use crate::plans::PlanCatalog;
use crate::pricing::{RateProvider, StoredRateProvider};
use crate::referrals::{CommissionEngine, ReferralGraph};
use crate::registry::MemberRegistry;
use crate::subscriptions::SubscriptionLedger;
use crate::wallets::WalletStore;

/// What [`SavingsLedger::seed`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub levels_configured: usize,
    pub plans_created: usize,
    pub plans_existing: usize,
    pub initial_rate_published: bool,
}

#[derive(Debug)]
pub struct SavingsLedger {
    config: LedgerConfig,
    backend: SqliteBackend,
    rates: Arc<StoredRateProvider>,
    plans: PlanCatalog,
    registry: MemberRegistry,
    referrals: ReferralGraph,
    commissions: CommissionEngine,
    wallets: WalletStore,
    subscriptions: SubscriptionLedger,
}

impl SavingsLedger {
    /// Open the configured store (in memory when no path is set)
    pub async fn open(config: LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let backend = match &config.store.database_path {
            Some(path) => SqliteBackend::open_with(path, config.store.max_connections).await?,
            None => SqliteBackend::open_in_memory().await?,
        };
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: LedgerConfig, backend: SqliteBackend) -> Self {
        let secret = config.gateway.resolve_secret();
        let retry = config.retry.clone();
        let max_depth = config.referral.max_depth;

        let rates = Arc::new(StoredRateProvider::new(
            backend.clone(),
            Duration::from_secs(config.rates.cache_ttl_secs),
        ));
        let referrals = ReferralGraph::new(backend.clone(), max_depth, config.referral.depth_policy, retry.clone());
        let commissions = CommissionEngine::new(backend.clone(), max_depth, retry.clone());
        let provider: Arc<dyn RateProvider> = rates.clone();
        let subscriptions = SubscriptionLedger::new(
            backend.clone(),
            provider,
            commissions.clone(),
            config.rates.fallback_rate,
            secret.clone(),
            retry.clone(),
        );

        Self {
            plans: PlanCatalog::new(backend.clone()),
            registry: MemberRegistry::new(backend.clone(), referrals.clone(), retry.clone()),
            wallets: WalletStore::new(backend.clone(), secret, retry),
            rates,
            referrals,
            commissions,
            subscriptions,
            backend,
            config,
        }
    }

    /// Apply the configured level table, plans and initial rate.
    ///
    /// Plans are matched by name and never overwritten; the initial rate is
    /// only published into an empty rate table.
    pub async fn seed(&self) -> LedgerResult<SeedSummary> {
        let mut summary = SeedSummary::default();

        for seed in &self.config.referral.levels {
            self.commissions.set_level(seed.level, seed.percentage).await?;
            summary.levels_configured += 1;
        }

        for plan in &self.config.plans {
            if self.plans.find_by_name(&plan.name).await?.is_some() {
                summary.plans_existing += 1;
            } else {
                self.plans.create(plan).await?;
                summary.plans_created += 1;
            }
        }

        if let Some(rate) = self.config.rates.initial_rate {
            match self.rates.current_rate(None).await {
                Err(LedgerError::NoRateAvailable) => {
                    self.rates.publish_rate(rate, Utc::now().date_naive()).await?;
                    summary.initial_rate_published = true;
                }
                Err(other) => return Err(other),
                Ok(_) => {}
            }
        }

        info!(
            levels = summary.levels_configured,
            plans_created = summary.plans_created,
            plans_existing = summary.plans_existing,
            initial_rate = summary.initial_rate_published,
            "ledger seeded"
        );
        Ok(summary)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    pub fn rates(&self) -> &StoredRateProvider {
        &self.rates
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub fn registry(&self) -> &MemberRegistry {
        &self.registry
    }

    pub fn referrals(&self) -> &ReferralGraph {
        &self.referrals
    }

    pub fn commissions(&self) -> &CommissionEngine {
        &self.commissions
    }

    pub fn wallets(&self) -> &WalletStore {
        &self.wallets
    }

    pub fn subscriptions(&self) -> &SubscriptionLedger {
        &self.subscriptions
    }

    pub async fn close(&self) {
        self.backend.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::NewPlan;
    use rust_decimal_macros::dec;

    fn config() -> LedgerConfig {
        let mut config = LedgerConfig::for_testing();
        config.rates.initial_rate = Some(dec!(6500));
        config.plans.push(NewPlan {
            name: "Gold 1000".to_string(),
            monthly_amount: dec!(1000),
            duration_months: 12,
            payment_months: 12,
            bonus_percentage: None,
            bonus_amount: Some(dec!(4500)),
        });
        config
    }

    #[tokio::test]
    async fn test_seed_is_repeatable() {
        let ledger = SavingsLedger::open(config()).await.unwrap();

        let first = ledger.seed().await.unwrap();
        assert_eq!(first.levels_configured, 5);
        assert_eq!(first.plans_created, 1);
        assert!(first.initial_rate_published);

        let second = ledger.seed().await.unwrap();
        assert_eq!(second.plans_created, 0);
        assert_eq!(second.plans_existing, 1);
        assert!(!second.initial_rate_published);

        assert_eq!(ledger.plans().list(true).await.unwrap().len(), 1);
        assert_eq!(ledger.commissions().level_config().await.unwrap().len(), 5);
        assert_eq!(ledger.rates().current_rate(None).await.unwrap().rate_per_gram, dec!(6500));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut config = LedgerConfig::for_testing();
        config.retry.max_attempts = 0;
        assert!(matches!(SavingsLedger::open(config).await, Err(LedgerError::InvalidInput(_))));
    }
}
