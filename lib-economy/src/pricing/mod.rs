//! Gold rate provider
//!
//! The ledger asks for the rate once per payment, before it opens its
//! transaction. A missing rate is not fatal: callers use
//! [`RateProvider::current_rate_or`] with the configured fallback.

pub mod fixed;
pub mod stored;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lib_types::Amount;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::{LedgerError, LedgerResult};

pub use fixed::StaticRateProvider;
pub use stored::StoredRateProvider;

/// Where a rate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Published,
    Fallback,
    Fixed,
}

/// Gold price per gram in rupees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRate {
    pub rate_per_gram: Amount,
    pub as_of_date: NaiveDate,
    /// Publication time for published rates
    pub published_at: Option<DateTime<Utc>>,
    pub source: RateSource,
}

impl GoldRate {
    pub fn fallback(rate_per_gram: Amount, as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            rate_per_gram,
            as_of_date: as_of.unwrap_or_else(Utc::now).date_naive(),
            published_at: None,
            source: RateSource::Fallback,
        }
    }
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Most recent rate at or before `as_of` (default now).
    ///
    /// Fails with `NoRateAvailable` when nothing was published by then.
    async fn current_rate(&self, as_of: Option<DateTime<Utc>>) -> LedgerResult<GoldRate>;

    /// Like [`current_rate`](Self::current_rate) but substitutes `fallback`
    /// when no rate is available
    async fn current_rate_or(&self, as_of: Option<DateTime<Utc>>, fallback: Amount) -> LedgerResult<GoldRate> {
        match self.current_rate(as_of).await {
            Err(LedgerError::NoRateAvailable) => {
                warn!(%fallback, "no gold rate published, using fallback");
                Ok(GoldRate::fallback(fallback, as_of))
            }
            other => other,
        }
    }
}
