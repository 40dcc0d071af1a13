//! Rate provider backed by the `gold_rates` table
//!
//! The latest rate is cached for a configurable TTL. Lookups with an explicit
//! `as_of` always hit the table.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use lib_storage::ledger::{now_unix, rates};
use lib_storage::SqliteBackend;
use lib_types::Amount;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{GoldRate, RateProvider, RateSource};
use crate::convert::{format_date, from_minor, parse_date, positive_minor, timestamp};
use crate::errors::{LedgerError, LedgerResult};

#[derive(Debug)]
pub struct StoredRateProvider {
    backend: SqliteBackend,
    ttl: Duration,
    cache: Mutex<Option<(Instant, GoldRate)>>,
}

impl StoredRateProvider {
    pub fn new(backend: SqliteBackend, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Publish a new rate and drop the cached one
    pub async fn publish_rate(&self, rate_per_gram: Amount, rate_date: NaiveDate) -> LedgerResult<GoldRate> {
        let minor = positive_minor(rate_per_gram, "gold rate")?;

        let mut conn = self.backend.acquire().await?;
        let row = rates::insert_rate(&mut conn, minor, &format_date(rate_date), now_unix()).await?;
        drop(conn);

        self.invalidate();
        info!(rate_id = row.rate_id, rate = %rate_per_gram, date = %rate_date, "gold rate published");
        Ok(GoldRate {
            rate_per_gram: from_minor(row.rate_per_gram),
            as_of_date: rate_date,
            published_at: Some(timestamp(row.published_at)?),
            source: RateSource::Published,
        })
    }

    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn cached(&self) -> Option<GoldRate> {
        let cache = self.cache.lock();
        match cache.as_ref() {
            Some((fetched, rate)) if fetched.elapsed() < self.ttl => Some(rate.clone()),
            _ => None,
        }
    }

    async fn lookup(&self, at: i64) -> LedgerResult<GoldRate> {
        let mut conn = self.backend.acquire().await?;
        let row = rates::latest_at_or_before(&mut conn, at)
            .await?
            .ok_or(LedgerError::NoRateAvailable)?;
        Ok(GoldRate {
            rate_per_gram: from_minor(row.rate_per_gram),
            as_of_date: parse_date(&row.rate_date)?,
            published_at: Some(timestamp(row.published_at)?),
            source: RateSource::Published,
        })
    }
}

#[async_trait]
impl RateProvider for StoredRateProvider {
    async fn current_rate(&self, as_of: Option<DateTime<Utc>>) -> LedgerResult<GoldRate> {
        if let Some(as_of) = as_of {
            return self.lookup(as_of.timestamp()).await;
        }
        if let Some(rate) = self.cached() {
            return Ok(rate);
        }
        let rate = self.lookup(now_unix()).await?;
        debug!(rate = %rate.rate_per_gram, "gold rate cache refreshed");
        if !self.ttl.is_zero() {
            *self.cache.lock() = Some((Instant::now(), rate.clone()));
        }
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn provider(ttl_secs: u64) -> StoredRateProvider {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        StoredRateProvider::new(backend, Duration::from_secs(ttl_secs))
    }

    fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[tokio::test]
    async fn test_empty_table_has_no_rate() {
        let provider = provider(0).await;
        assert!(matches!(provider.current_rate(None).await, Err(LedgerError::NoRateAvailable)));
        let fallback = provider.current_rate_or(None, dec!(6500)).await.unwrap();
        assert_eq!(fallback.rate_per_gram, dec!(6500));
        assert_eq!(fallback.source, RateSource::Fallback);
    }

    #[tokio::test]
    async fn test_publish_replaces_cached_rate() {
        let provider = provider(3600).await;
        provider.publish_rate(dec!(6500), today()).await.unwrap();
        assert_eq!(provider.current_rate(None).await.unwrap().rate_per_gram, dec!(6500));

        provider.publish_rate(dec!(6612.25), today()).await.unwrap();
        assert_eq!(provider.current_rate(None).await.unwrap().rate_per_gram, dec!(6612.25));
    }

    #[tokio::test]
    async fn test_as_of_before_first_publication() {
        let provider = provider(0).await;
        provider.publish_rate(dec!(6500), today()).await.unwrap();
        let long_ago = Utc::now() - chrono::Duration::days(30);
        assert!(matches!(
            provider.current_rate(Some(long_ago)).await,
            Err(LedgerError::NoRateAvailable)
        ));
    }

    #[tokio::test]
    async fn test_non_positive_rate_rejected() {
        let provider = provider(0).await;
        assert!(matches!(
            provider.publish_rate(dec!(0), today()).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            provider.publish_rate(dec!(-5), today()).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }
}
