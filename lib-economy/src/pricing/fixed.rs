//! Constant rate provider for bootstrapping and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lib_types::Amount;

use super::{GoldRate, RateProvider, RateSource};
use crate::errors::{LedgerError, LedgerResult};

/// Always returns the same rate; `None` behaves like an empty rate table
#[derive(Debug, Clone)]
pub struct StaticRateProvider {
    rate_per_gram: Option<Amount>,
}

impl StaticRateProvider {
    pub fn new(rate_per_gram: Amount) -> Self {
        Self {
            rate_per_gram: Some(rate_per_gram),
        }
    }

    pub fn unavailable() -> Self {
        Self { rate_per_gram: None }
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn current_rate(&self, as_of: Option<DateTime<Utc>>) -> LedgerResult<GoldRate> {
        let rate_per_gram = self.rate_per_gram.ok_or(LedgerError::NoRateAvailable)?;
        Ok(GoldRate {
            rate_per_gram,
            as_of_date: as_of.unwrap_or_else(Utc::now).date_naive(),
            published_at: None,
            source: RateSource::Fixed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_unavailable_falls_back() {
        let provider = StaticRateProvider::unavailable();
        assert!(matches!(provider.current_rate(None).await, Err(LedgerError::NoRateAvailable)));

        let rate = provider.current_rate_or(None, dec!(6500)).await.unwrap();
        assert_eq!(rate.rate_per_gram, dec!(6500));
        assert_eq!(rate.source, RateSource::Fallback);
    }

    #[tokio::test]
    async fn test_fixed_rate_ignores_fallback() {
        let provider = StaticRateProvider::new(dec!(7000));
        let rate = provider.current_rate_or(None, dec!(6500)).await.unwrap();
        assert_eq!(rate.rate_per_gram, dec!(7000));
        assert_eq!(rate.source, RateSource::Fixed);
    }
}
