//! Commission engine
//!
//! A qualifying payment pays every ancestor of the payer a percentage taken
//! from the level table. The source payment id is claimed before anything is
//! credited, so replaying the same payment fails instead of paying twice.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lib_storage::ledger::{commissions, now_unix};
use lib_storage::{SqliteBackend, SqliteConnection};
use lib_types::{round_money, Amount, PaymentId, Percentage, TransactionKind, UserId, WalletField};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::graph::ReferralGraph;
use crate::config::RetryConfig;
use crate::convert::{count, from_minor, parse_field, positive_minor, timestamp, to_minor};
use crate::errors::{LedgerError, LedgerResult};
use crate::retry::with_conflict_retry;
use crate::wallets::{ActivityEntry, WalletStore};

/// Constraint reported when a source payment is claimed twice
const SOURCE_UNIQUE: &str = "commission_sources.source_payment_id";

/// Commission paid to one ancestor for one source payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub record_id: i64,
    pub ancestor_id: UserId,
    pub from_user_id: UserId,
    pub level: u32,
    pub amount: Amount,
    pub percentage: Percentage,
    pub source_payment_id: PaymentId,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<commissions::CommissionRow> for CommissionRecord {
    type Error = LedgerError;

    fn try_from(row: commissions::CommissionRow) -> LedgerResult<Self> {
        Ok(Self {
            record_id: row.record_id,
            ancestor_id: parse_field(&row.ancestor_id, "ancestor id")?,
            from_user_id: parse_field(&row.from_user_id, "paying user id")?,
            level: count(row.level, "commission level")?,
            amount: from_minor(row.amount),
            percentage: parse_field(&row.percentage, "commission percentage")?,
            source_payment_id: parse_field(&row.source_payment_id, "source payment id")?,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Row of the commission table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelPercentage {
    pub level: u32,
    pub percentage: Percentage,
}

/// `payment * percentage / 100`, rounded half-up to paise
pub fn commission_amount(payment_amount: Amount, percentage: Percentage) -> Amount {
    round_money(payment_amount * percentage / Decimal::ONE_HUNDRED)
}

#[derive(Debug, Clone)]
pub struct CommissionEngine {
    backend: SqliteBackend,
    max_depth: u32,
    retry: RetryConfig,
}

impl CommissionEngine {
    pub fn new(backend: SqliteBackend, max_depth: u32, retry: RetryConfig) -> Self {
        Self {
            backend,
            max_depth: max_depth.max(1),
            retry,
        }
    }

    /// Propagate commissions for a payment in its own transaction
    pub async fn on_qualifying_payment(
        &self,
        paying_user_id: UserId,
        payment_amount: Amount,
        source_payment_id: PaymentId,
    ) -> LedgerResult<Vec<CommissionRecord>> {
        with_conflict_retry(&self.retry, "commission propagation", || async move {
            let mut tx = self.backend.begin().await?;
            let records = self
                .apply_in(&mut tx, paying_user_id, payment_amount, source_payment_id)
                .await?;
            SqliteBackend::commit(tx).await?;
            Ok(records)
        })
        .await
    }

    /// Propagate commissions inside the caller's transaction.
    ///
    /// Levels without a configured percentage, and commissions that round to
    /// zero, are skipped.
    pub(crate) async fn apply_in(
        &self,
        conn: &mut SqliteConnection,
        paying_user_id: UserId,
        payment_amount: Amount,
        source_payment_id: PaymentId,
    ) -> LedgerResult<Vec<CommissionRecord>> {
        let payment_minor = positive_minor(payment_amount, "payment amount")?;
        let source = source_payment_id.to_string();
        let payer = paying_user_id.to_string();
        let now = now_unix();

        commissions::insert_source(conn, &source, &payer, payment_minor, now)
            .await
            .map_err(|e| {
                if e.is_unique_on(SOURCE_UNIQUE) {
                    LedgerError::DuplicateSourcePayment(source.clone())
                } else {
                    e.into()
                }
            })?;

        let table = Self::level_table_in(conn).await?;
        let ancestors = ReferralGraph::ancestors_in(conn, paying_user_id).await?;

        let mut records = Vec::new();
        for ancestor in ancestors.into_iter().filter(|a| a.level <= self.max_depth) {
            let Some(&percentage) = table.get(&ancestor.level) else {
                continue;
            };
            let amount = commission_amount(payment_amount, percentage);
            if amount <= Decimal::ZERO {
                continue;
            }

            let mut row = commissions::CommissionRow {
                record_id: 0,
                ancestor_id: ancestor.ancestor_id.to_string(),
                from_user_id: payer.clone(),
                level: i64::from(ancestor.level),
                amount: to_minor(amount, "commission")?,
                percentage: percentage.normalize().to_string(),
                source_payment_id: source.clone(),
                created_at: now,
            };
            row.record_id = commissions::insert_record(conn, &row).await?;

            WalletStore::credit_in(conn, ancestor.ancestor_id, WalletField::ReferralBalance, amount).await?;
            WalletStore::credit_in(conn, ancestor.ancestor_id, WalletField::TotalEarnings, amount).await?;
            WalletStore::log_in(
                conn,
                ActivityEntry {
                    user_id: ancestor.ancestor_id,
                    account_id: None,
                    kind: TransactionKind::Commission,
                    amount,
                    reference: Some(source.clone()),
                    description: format!("Level {} referral commission", ancestor.level),
                },
            )
            .await?;

            debug!(
                ancestor = %ancestor.ancestor_id,
                level = ancestor.level,
                %amount,
                "commission credited"
            );
            records.push(CommissionRecord::try_from(row)?);
        }

        info!(
            payer = %paying_user_id,
            source = %source_payment_id,
            amount = %payment_amount,
            paid = records.len(),
            "commissions propagated"
        );
        Ok(records)
    }

    async fn level_table_in(conn: &mut SqliteConnection) -> LedgerResult<HashMap<u32, Percentage>> {
        commissions::list_levels(conn)
            .await?
            .into_iter()
            .map(|row| {
                Ok((
                    count(row.level, "commission level")?,
                    parse_field(&row.percentage, "level percentage")?,
                ))
            })
            .collect()
    }

    /// Most recent commissions earned by `ancestor_id`
    pub async fn commissions_for(&self, ancestor_id: UserId, limit: u32) -> LedgerResult<Vec<CommissionRecord>> {
        let mut conn = self.backend.acquire().await?;
        commissions::records_for_ancestor(&mut conn, &ancestor_id.to_string(), i64::from(limit))
            .await?
            .into_iter()
            .map(CommissionRecord::try_from)
            .collect()
    }

    /// Everything paid out for one source payment, nearest level first
    pub async fn commissions_from_source(&self, source_payment_id: PaymentId) -> LedgerResult<Vec<CommissionRecord>> {
        let mut conn = self.backend.acquire().await?;
        commissions::records_for_source(&mut conn, &source_payment_id.to_string())
            .await?
            .into_iter()
            .map(CommissionRecord::try_from)
            .collect()
    }

    /// Set the percentage paid at `level`
    pub async fn set_level(&self, level: u32, percentage: Percentage) -> LedgerResult<()> {
        if level == 0 || level > self.max_depth {
            return Err(LedgerError::InvalidInput(format!(
                "level {} outside 1..={}",
                level, self.max_depth
            )));
        }
        if percentage < Decimal::ZERO || percentage > Decimal::ONE_HUNDRED {
            return Err(LedgerError::InvalidInput(format!("percentage {} outside 0..=100", percentage)));
        }
        let mut conn = self.backend.acquire().await?;
        commissions::upsert_level(&mut conn, i64::from(level), &percentage.normalize().to_string(), now_unix()).await?;
        info!(level, %percentage, "commission level configured");
        Ok(())
    }

    /// Stop paying commission at `level`; returns whether it was configured
    pub async fn remove_level(&self, level: u32) -> LedgerResult<bool> {
        let mut conn = self.backend.acquire().await?;
        let removed = commissions::delete_level(&mut conn, i64::from(level)).await?;
        if removed {
            info!(level, "commission level removed");
        }
        Ok(removed)
    }

    pub async fn level_config(&self) -> LedgerResult<Vec<LevelPercentage>> {
        let mut conn = self.backend.acquire().await?;
        let mut levels: Vec<LevelPercentage> = Self::level_table_in(&mut conn)
            .await?
            .into_iter()
            .map(|(level, percentage)| LevelPercentage { level, percentage })
            .collect();
        levels.sort_by_key(|l| l.level);
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepthPolicy;
    use lib_storage::ledger::members::{insert_member, MemberRow};
    use rust_decimal_macros::dec;

    struct Fixture {
        backend: SqliteBackend,
        engine: CommissionEngine,
        graph: ReferralGraph,
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        }
    }

    async fn fixture() -> Fixture {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        Fixture {
            engine: CommissionEngine::new(backend.clone(), 10, retry()),
            graph: ReferralGraph::new(backend.clone(), 10, DepthPolicy::Truncate, retry()),
            backend,
        }
    }

    async fn member(f: &Fixture, n: u32) -> UserId {
        let user_id = UserId::generate();
        let mut conn = f.backend.acquire().await.unwrap();
        insert_member(
            &mut conn,
            &MemberRow {
                user_id: user_id.to_string(),
                full_name: format!("Member {}", n),
                phone: format!("98000000{:02}", n),
                referral_code: format!("REF2000{:02}", n),
                referred_by: None,
                created_at: i64::from(n),
            },
        )
        .await
        .unwrap();
        user_id
    }

    #[test]
    fn test_commission_rounding() {
        assert_eq!(commission_amount(dec!(1000), dec!(10)), dec!(100.00));
        assert_eq!(commission_amount(dec!(333), dec!(2.5)), dec!(8.33));
        // 0.125 rounds away from zero
        assert_eq!(commission_amount(dec!(12.5), dec!(1)), dec!(0.13));
    }

    #[tokio::test]
    async fn test_two_level_propagation() {
        let f = fixture().await;
        let a = member(&f, 1).await;
        let b = member(&f, 2).await;
        let c = member(&f, 3).await;
        f.graph.register_referral(b, a).await.unwrap();
        f.graph.register_referral(c, b).await.unwrap();
        f.engine.set_level(1, dec!(10)).await.unwrap();
        f.engine.set_level(2, dec!(5)).await.unwrap();

        let source = PaymentId::generate();
        let records = f.engine.on_qualifying_payment(c, dec!(1000), source).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!((records[0].ancestor_id, records[0].level, records[0].amount), (b, 1, dec!(100)));
        assert_eq!((records[1].ancestor_id, records[1].level, records[1].amount), (a, 2, dec!(50)));

        assert_eq!(f.engine.commissions_for(b, 10).await.unwrap().len(), 1);
        assert_eq!(f.engine.commissions_from_source(source).await.unwrap(), records);
    }

    #[tokio::test]
    async fn test_replayed_source_is_rejected_without_double_credit() {
        let f = fixture().await;
        let a = member(&f, 1).await;
        let b = member(&f, 2).await;
        f.graph.register_referral(b, a).await.unwrap();
        f.engine.set_level(1, dec!(10)).await.unwrap();

        let source = PaymentId::generate();
        f.engine.on_qualifying_payment(b, dec!(1000), source).await.unwrap();
        let err = f.engine.on_qualifying_payment(b, dec!(1000), source).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSourcePayment(_)));

        assert_eq!(f.engine.commissions_from_source(source).await.unwrap().len(), 1);
        let mut conn = f.backend.acquire().await.unwrap();
        let wallet = WalletStore::wallet_in(&mut conn, a).await.unwrap();
        assert_eq!(wallet.referral_balance, dec!(100));
        assert_eq!(wallet.total_earnings, dec!(100));
        assert_eq!(wallet.total_balance, dec!(100));
    }

    #[tokio::test]
    async fn test_unconfigured_level_is_skipped() {
        let f = fixture().await;
        let a = member(&f, 1).await;
        let b = member(&f, 2).await;
        let c = member(&f, 3).await;
        f.graph.register_referral(b, a).await.unwrap();
        f.graph.register_referral(c, b).await.unwrap();
        f.engine.set_level(2, dec!(5)).await.unwrap();

        let records = f.engine.on_qualifying_payment(c, dec!(1000), PaymentId::generate()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ancestor_id, a);
    }

    #[tokio::test]
    async fn test_root_payer_claims_source_but_pays_nothing() {
        let f = fixture().await;
        let a = member(&f, 1).await;
        f.engine.set_level(1, dec!(10)).await.unwrap();

        let source = PaymentId::generate();
        assert!(f.engine.on_qualifying_payment(a, dec!(1000), source).await.unwrap().is_empty());
        assert!(matches!(
            f.engine.on_qualifying_payment(a, dec!(1000), source).await,
            Err(LedgerError::DuplicateSourcePayment(_))
        ));
    }

    #[tokio::test]
    async fn test_level_administration() {
        let f = fixture().await;
        f.engine.set_level(2, dec!(5)).await.unwrap();
        f.engine.set_level(1, dec!(10)).await.unwrap();
        f.engine.set_level(1, dec!(12.5)).await.unwrap();

        let levels = f.engine.level_config().await.unwrap();
        assert_eq!(
            levels,
            vec![
                LevelPercentage { level: 1, percentage: dec!(12.5) },
                LevelPercentage { level: 2, percentage: dec!(5) },
            ]
        );

        assert!(matches!(f.engine.set_level(0, dec!(1)).await, Err(LedgerError::InvalidInput(_))));
        assert!(matches!(f.engine.set_level(11, dec!(1)).await, Err(LedgerError::InvalidInput(_))));
        assert!(matches!(f.engine.set_level(1, dec!(100.01)).await, Err(LedgerError::InvalidInput(_))));
        assert!(f.engine.remove_level(2).await.unwrap());
        assert_eq!(f.engine.level_config().await.unwrap().len(), 1);
    }
}
