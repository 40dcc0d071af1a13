//! Wallet and balance store
//!
//! The wallet row is the system of record for a member's balances. Every
//! change goes through `credit_in` / `debit_in` on a caller-owned transaction,
//! and the storage layer rewrites `total_balance` in the same statement as
//! savings or referral balance, so `total = savings + referral` holds after
//! every commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use lib_storage::ledger::{activity, members, now_unix, wallets};
use lib_storage::{SqliteBackend, SqliteConnection, StorageError};
use lib_types::{AccountId, Amount, Milligrams, TransactionKind, UserId, WalletField, WithdrawalSource};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::convert::{from_minor, parse_field, parse_opt_field, positive_minor, timestamp, to_minor};
use crate::errors::{LedgerError, LedgerResult};
use crate::gateway::{consume_capture_in, CaptureConfirmation};
use crate::retry::with_conflict_retry;

/// Smallest accepted wallet top-up in rupees
pub const MIN_TOP_UP: Amount = Decimal::ONE;

/// Per-member balances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub savings_balance: Amount,
    pub referral_balance: Amount,
    pub gold_balance_mg: Milligrams,
    /// Always `savings_balance + referral_balance`
    pub total_balance: Amount,
    pub total_earnings: Amount,
    pub total_withdrawn: Amount,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<wallets::WalletRow> for Wallet {
    type Error = LedgerError;

    fn try_from(row: wallets::WalletRow) -> LedgerResult<Self> {
        Ok(Self {
            user_id: parse_field(&row.user_id, "wallet user id")?,
            savings_balance: from_minor(row.savings_balance),
            referral_balance: from_minor(row.referral_balance),
            gold_balance_mg: row.gold_balance_mg,
            total_balance: from_minor(row.total_balance),
            total_earnings: from_minor(row.total_earnings),
            total_withdrawn: from_minor(row.total_withdrawn),
            updated_at: timestamp(row.updated_at)?,
        })
    }
}

/// Entry in a member's activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub tx_id: i64,
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub reference: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<activity::ActivityRow> for LedgerTransaction {
    type Error = LedgerError;

    fn try_from(row: activity::ActivityRow) -> LedgerResult<Self> {
        Ok(Self {
            tx_id: row.tx_id,
            user_id: parse_field(&row.user_id, "activity user id")?,
            account_id: parse_opt_field(row.account_id.as_deref(), "activity account id")?,
            kind: parse_field(&row.kind, "activity kind")?,
            amount: from_minor(row.amount),
            reference: row.reference,
            description: row.description,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Activity log entry to append inside a transaction
pub(crate) struct ActivityEntry {
    pub user_id: UserId,
    pub account_id: Option<AccountId>,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub reference: Option<String>,
    pub description: String,
}

fn gold_to_f64(amount: Decimal) -> LedgerResult<Milligrams> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!("gold amount must be positive, got {}", amount)));
    }
    amount
        .to_f64()
        .ok_or_else(|| LedgerError::InvalidAmount(format!("gold amount {} out of range", amount)))
}

fn missing_member(user_id: UserId) -> impl FnOnce(StorageError) -> LedgerError {
    move |err| match err {
        StorageError::ForeignKeyViolation(_) => LedgerError::not_found("member", user_id),
        other => other.into(),
    }
}

#[derive(Debug, Clone)]
pub struct WalletStore {
    backend: SqliteBackend,
    capture_secret: Option<Arc<str>>,
    retry: RetryConfig,
}

impl WalletStore {
    pub fn new(backend: SqliteBackend, capture_secret: Option<String>, retry: RetryConfig) -> Self {
        Self {
            backend,
            capture_secret: capture_secret.map(Arc::from),
            retry,
        }
    }

    // ========================================================================
    // In-transaction primitives
    // ========================================================================

    /// Add a positive amount to a field, creating the wallet if needed.
    ///
    /// For [`WalletField::GoldBalanceMg`] the amount is milligrams.
    pub(crate) async fn credit_in(
        conn: &mut SqliteConnection,
        user_id: UserId,
        field: WalletField,
        amount: Decimal,
    ) -> LedgerResult<()> {
        if field.is_gold() {
            return Self::credit_gold_in(conn, user_id, gold_to_f64(amount)?).await;
        }
        let minor = positive_minor(amount, field.column())?;
        let uid = user_id.to_string();
        let now = now_unix();
        wallets::ensure_wallet(conn, &uid, now).await.map_err(missing_member(user_id))?;
        wallets::adjust_minor(conn, &uid, field, minor, now).await?;
        debug!(user_id = %user_id, %field, %amount, "wallet credited");
        Ok(())
    }

    /// Add gold mass, creating the wallet if needed
    pub(crate) async fn credit_gold_in(conn: &mut SqliteConnection, user_id: UserId, mg: Milligrams) -> LedgerResult<()> {
        if !(mg.is_finite() && mg > 0.0) {
            return Err(LedgerError::InvalidAmount(format!("gold amount must be positive, got {}", mg)));
        }
        let uid = user_id.to_string();
        let now = now_unix();
        wallets::ensure_wallet(conn, &uid, now).await.map_err(missing_member(user_id))?;
        wallets::adjust_gold(conn, &uid, mg, now).await?;
        debug!(user_id = %user_id, mg, "gold credited");
        Ok(())
    }

    /// Subtract a positive amount; never lets a balance go below zero
    pub(crate) async fn debit_in(
        conn: &mut SqliteConnection,
        user_id: UserId,
        field: WalletField,
        amount: Decimal,
    ) -> LedgerResult<()> {
        let uid = user_id.to_string();
        let row = wallets::get_wallet(conn, &uid)
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", user_id))?;
        let now = now_unix();

        if field.is_gold() {
            let mg = gold_to_f64(amount)?;
            if mg > row.gold_balance_mg {
                return Err(LedgerError::InsufficientBalance {
                    field,
                    available: row.gold_balance_mg.to_string(),
                    requested: mg.to_string(),
                });
            }
            wallets::adjust_gold(conn, &uid, -mg, now).await?;
        } else {
            let minor = positive_minor(amount, field.column())?;
            let available = row.minor_units(field).unwrap_or_default();
            let insufficient = || LedgerError::InsufficientBalance {
                field,
                available: from_minor(available).to_string(),
                requested: amount.to_string(),
            };
            if minor > available {
                return Err(insufficient());
            }
            wallets::adjust_minor(conn, &uid, field, -minor, now)
                .await
                .map_err(|e| match e {
                    StorageError::CheckViolation(_) => insufficient(),
                    other => other.into(),
                })?;
        }
        debug!(user_id = %user_id, %field, %amount, "wallet debited");
        Ok(())
    }

    pub(crate) async fn log_in(conn: &mut SqliteConnection, entry: ActivityEntry) -> LedgerResult<i64> {
        let row = activity::ActivityRow {
            tx_id: 0,
            user_id: entry.user_id.to_string(),
            account_id: entry.account_id.map(|a| a.to_string()),
            kind: entry.kind.as_str().to_string(),
            amount: to_minor(entry.amount, "activity amount")?,
            reference: entry.reference,
            description: entry.description,
            created_at: now_unix(),
        };
        Ok(activity::append(conn, &row).await?)
    }

    pub(crate) async fn wallet_in(conn: &mut SqliteConnection, user_id: UserId) -> LedgerResult<Wallet> {
        wallets::get_wallet(conn, &user_id.to_string())
            .await?
            .ok_or_else(|| LedgerError::not_found("wallet", user_id))?
            .try_into()
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    pub async fn credit(&self, user_id: UserId, field: WalletField, amount: Decimal) -> LedgerResult<Wallet> {
        with_conflict_retry(&self.retry, "wallet credit", || async move {
            let mut tx = self.backend.begin().await?;
            Self::credit_in(&mut tx, user_id, field, amount).await?;
            let wallet = Self::wallet_in(&mut tx, user_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(wallet)
        })
        .await
    }

    pub async fn debit(&self, user_id: UserId, field: WalletField, amount: Decimal) -> LedgerResult<Wallet> {
        with_conflict_retry(&self.retry, "wallet debit", || async move {
            let mut tx = self.backend.begin().await?;
            Self::debit_in(&mut tx, user_id, field, amount).await?;
            let wallet = Self::wallet_in(&mut tx, user_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(wallet)
        })
        .await
    }

    pub async fn wallet(&self, user_id: UserId) -> LedgerResult<Wallet> {
        let mut conn = self.backend.acquire().await?;
        Self::wallet_in(&mut conn, user_id).await
    }

    /// Credit savings from a verified gateway capture
    pub async fn top_up(
        &self,
        user_id: UserId,
        account_id: Option<AccountId>,
        capture: &CaptureConfirmation,
    ) -> LedgerResult<Wallet> {
        if capture.amount < MIN_TOP_UP {
            return Err(LedgerError::InvalidAmount(format!(
                "top-up {} below minimum {}",
                capture.amount, MIN_TOP_UP
            )));
        }
        capture.verify(self.capture_secret.as_deref())?;

        let wallet = with_conflict_retry(&self.retry, "wallet top-up", || async move {
            let mut tx = self.backend.begin().await?;
            if let Some(account_id) = account_id {
                let account = members::get_account(&mut tx, &account_id.to_string())
                    .await?
                    .ok_or_else(|| LedgerError::not_found("account", account_id))?;
                if account.user_id != user_id.to_string() {
                    return Err(LedgerError::not_found("account", account_id));
                }
            }
            consume_capture_in(&mut tx, capture, user_id, TransactionKind::WalletTopup.as_str()).await?;
            Self::credit_in(&mut tx, user_id, WalletField::SavingsBalance, capture.amount).await?;
            Self::log_in(
                &mut tx,
                ActivityEntry {
                    user_id,
                    account_id,
                    kind: TransactionKind::WalletTopup,
                    amount: capture.amount,
                    reference: Some(capture.payment_id.clone()),
                    description: "Wallet top-up".to_string(),
                },
            )
            .await?;
            let wallet = Self::wallet_in(&mut tx, user_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(wallet)
        })
        .await?;

        info!(user_id = %user_id, amount = %capture.amount, payment_id = %capture.payment_id, "wallet topped up");
        Ok(wallet)
    }

    /// Move money out of savings or referral balance
    pub async fn withdraw(&self, user_id: UserId, source: WithdrawalSource, amount: Amount) -> LedgerResult<Wallet> {
        positive_minor(amount, "withdrawal")?;
        let field = source.field();

        let wallet = with_conflict_retry(&self.retry, "withdrawal", || async move {
            let mut tx = self.backend.begin().await?;
            Self::debit_in(&mut tx, user_id, field, amount).await?;
            Self::credit_in(&mut tx, user_id, WalletField::TotalWithdrawn, amount).await?;
            Self::log_in(
                &mut tx,
                ActivityEntry {
                    user_id,
                    account_id: None,
                    kind: TransactionKind::Withdrawal,
                    amount,
                    reference: None,
                    description: format!("Withdrawal from {}", field),
                },
            )
            .await?;
            let wallet = Self::wallet_in(&mut tx, user_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(wallet)
        })
        .await?;

        info!(user_id = %user_id, %amount, %field, "withdrawal recorded");
        Ok(wallet)
    }

    /// Most recent activity, newest first
    pub async fn transactions(&self, user_id: UserId, limit: u32) -> LedgerResult<Vec<LedgerTransaction>> {
        let mut conn = self.backend.acquire().await?;
        activity::recent_for_user(&mut conn, &user_id.to_string(), i64::from(limit))
            .await?
            .into_iter()
            .map(LedgerTransaction::try_from)
            .collect()
    }

    /// Members whose stored total disagrees with their balances
    pub async fn inconsistent_wallets(&self) -> LedgerResult<Vec<UserId>> {
        let mut conn = self.backend.acquire().await?;
        wallets::inconsistent_wallets(&mut conn)
            .await?
            .iter()
            .map(|id| parse_field(id, "wallet user id"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_storage::ledger::members::{insert_member, MemberRow};
    use rust_decimal_macros::dec;

    const SECRET: &str = "test_capture_secret";

    async fn store_with_member() -> (WalletStore, UserId) {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let user_id = UserId::generate();
        {
            let mut conn = backend.acquire().await.unwrap();
            insert_member(
                &mut conn,
                &MemberRow {
                    user_id: user_id.to_string(),
                    full_name: "Asha".into(),
                    phone: "9876543210".into(),
                    referral_code: "REF123456".into(),
                    referred_by: None,
                    created_at: 1,
                },
            )
            .await
            .unwrap();
        }
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        };
        (WalletStore::new(backend, Some(SECRET.into()), retry), user_id)
    }

    #[tokio::test]
    async fn test_credit_creates_wallet_and_keeps_total() {
        let (store, user) = store_with_member().await;
        store.credit(user, WalletField::SavingsBalance, dec!(500)).await.unwrap();
        let wallet = store.credit(user, WalletField::ReferralBalance, dec!(100.25)).await.unwrap();

        assert_eq!(wallet.savings_balance, dec!(500));
        assert_eq!(wallet.referral_balance, dec!(100.25));
        assert_eq!(wallet.total_balance, dec!(600.25));
    }

    #[tokio::test]
    async fn test_debit_beyond_balance_fails_without_change() {
        let (store, user) = store_with_member().await;
        store.credit(user, WalletField::ReferralBalance, dec!(50)).await.unwrap();

        let err = store.debit(user, WalletField::ReferralBalance, dec!(50.01)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                field: WalletField::ReferralBalance,
                ..
            }
        ));
        assert_eq!(store.wallet(user).await.unwrap().referral_balance, dec!(50));
    }

    #[tokio::test]
    async fn test_gold_credit_and_debit() {
        let (store, user) = store_with_member().await;
        store.credit(user, WalletField::GoldBalanceMg, dec!(153.846)).await.unwrap();
        let wallet = store.debit(user, WalletField::GoldBalanceMg, dec!(53.846)).await.unwrap();
        assert!((wallet.gold_balance_mg - 100.0).abs() < 1e-9);
        assert_eq!(wallet.total_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let (store, user) = store_with_member().await;
        assert!(matches!(
            store.credit(user, WalletField::SavingsBalance, dec!(0)).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            store.credit(user, WalletField::SavingsBalance, dec!(-1)).await,
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_member_is_not_found() {
        let (store, _) = store_with_member().await;
        let err = store
            .credit(UserId::generate(), WalletField::SavingsBalance, dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound { entity: "member", .. }));
    }

    #[tokio::test]
    async fn test_top_up_once_per_capture() {
        let (store, user) = store_with_member().await;
        let capture = CaptureConfirmation::signed(SECRET, "order_1", "pay_1", dec!(2500)).unwrap();

        let wallet = store.top_up(user, None, &capture).await.unwrap();
        assert_eq!(wallet.savings_balance, dec!(2500));

        let err = store.top_up(user, None, &capture).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateSourcePayment(_)));
        assert_eq!(store.wallet(user).await.unwrap().savings_balance, dec!(2500));

        let log = store.transactions(user, 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, TransactionKind::WalletTopup);
        assert_eq!(log[0].reference.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn test_top_up_rejects_forgery_and_small_amounts() {
        let (store, user) = store_with_member().await;
        let mut forged = CaptureConfirmation::signed(SECRET, "order_1", "pay_1", dec!(2500)).unwrap();
        forged.order_id = "order_2".into();
        assert!(matches!(
            store.top_up(user, None, &forged).await,
            Err(LedgerError::SignatureVerificationFailed(_))
        ));

        let tiny = CaptureConfirmation::signed(SECRET, "order_3", "pay_3", dec!(0.50)).unwrap();
        assert!(matches!(store.top_up(user, None, &tiny).await, Err(LedgerError::InvalidAmount(_))));
        assert!(matches!(store.wallet(user).await, Err(LedgerError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_withdraw_updates_totals() {
        let (store, user) = store_with_member().await;
        store.credit(user, WalletField::ReferralBalance, dec!(300)).await.unwrap();

        let wallet = store.withdraw(user, WithdrawalSource::Referral, dec!(120)).await.unwrap();
        assert_eq!(wallet.referral_balance, dec!(180));
        assert_eq!(wallet.total_balance, dec!(180));
        assert_eq!(wallet.total_withdrawn, dec!(120));

        let err = store.withdraw(user, WithdrawalSource::Savings, dec!(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert!(store.inconsistent_wallets().await.unwrap().is_empty());
    }
}
