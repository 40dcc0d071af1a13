//! `wallets` table
//!
//! Every statement that moves savings or referral balance rewrites
//! `total_balance` in the same UPDATE. SQLite evaluates the SET expressions
//! against the old row, so the delta is bound twice.

use lib_types::WalletField;
use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `wallets`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct WalletRow {
    pub user_id: String,
    pub savings_balance: i64,
    pub referral_balance: i64,
    pub gold_balance_mg: f64,
    pub total_balance: i64,
    pub total_earnings: i64,
    pub total_withdrawn: i64,
    pub updated_at: i64,
}

impl WalletRow {
    /// Stored value of a currency column in paise; `None` for gold
    pub fn minor_units(&self, field: WalletField) -> Option<i64> {
        match field {
            WalletField::SavingsBalance => Some(self.savings_balance),
            WalletField::ReferralBalance => Some(self.referral_balance),
            WalletField::TotalEarnings => Some(self.total_earnings),
            WalletField::TotalWithdrawn => Some(self.total_withdrawn),
            WalletField::GoldBalanceMg => None,
        }
    }
}

const ADJUST_SAVINGS: &str = "UPDATE wallets SET savings_balance = savings_balance + ?, \
     total_balance = savings_balance + ? + referral_balance, updated_at = ? WHERE user_id = ?";

const ADJUST_REFERRAL: &str = "UPDATE wallets SET referral_balance = referral_balance + ?, \
     total_balance = savings_balance + referral_balance + ?, updated_at = ? WHERE user_id = ?";

const ADJUST_EARNINGS: &str =
    "UPDATE wallets SET total_earnings = total_earnings + ?, updated_at = ? WHERE user_id = ?";

const ADJUST_WITHDRAWN: &str =
    "UPDATE wallets SET total_withdrawn = total_withdrawn + ?, updated_at = ? WHERE user_id = ?";

const ADJUST_GOLD: &str =
    "UPDATE wallets SET gold_balance_mg = gold_balance_mg + ?, updated_at = ? WHERE user_id = ?";

/// Create an empty wallet if the member has none
pub async fn ensure_wallet(conn: &mut SqliteConnection, user_id: &str, now: i64) -> StorageResult<()> {
    sqlx::query("INSERT INTO wallets (user_id, updated_at) VALUES (?, ?) ON CONFLICT(user_id) DO NOTHING")
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn get_wallet(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Option<WalletRow>> {
    let row = sqlx::query_as::<_, WalletRow>("SELECT * FROM wallets WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Add a signed paise delta to a currency column.
///
/// Returns false when the wallet does not exist. A result below zero is
/// rejected by the table's CHECK constraints. Passing the gold field is a
/// no-op returning false; use [`adjust_gold`].
pub async fn adjust_minor(
    conn: &mut SqliteConnection,
    user_id: &str,
    field: WalletField,
    delta: i64,
    now: i64,
) -> StorageResult<bool> {
    let result = match field {
        WalletField::SavingsBalance | WalletField::ReferralBalance => {
            let sql = if field == WalletField::SavingsBalance {
                ADJUST_SAVINGS
            } else {
                ADJUST_REFERRAL
            };
            sqlx::query(sql)
                .bind(delta)
                .bind(delta)
                .bind(now)
                .bind(user_id)
                .execute(&mut *conn)
                .await?
        }
        WalletField::TotalEarnings | WalletField::TotalWithdrawn => {
            let sql = if field == WalletField::TotalEarnings {
                ADJUST_EARNINGS
            } else {
                ADJUST_WITHDRAWN
            };
            sqlx::query(sql)
                .bind(delta)
                .bind(now)
                .bind(user_id)
                .execute(&mut *conn)
                .await?
        }
        WalletField::GoldBalanceMg => return Ok(false),
    };
    Ok(result.rows_affected() == 1)
}

/// Add a signed milligram delta to the gold balance
pub async fn adjust_gold(conn: &mut SqliteConnection, user_id: &str, delta_mg: f64, now: i64) -> StorageResult<bool> {
    let result = sqlx::query(ADJUST_GOLD)
        .bind(delta_mg)
        .bind(now)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Wallets whose stored total disagrees with savings + referral (always empty
/// unless the table was edited by hand)
pub async fn inconsistent_wallets(conn: &mut SqliteConnection) -> StorageResult<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT user_id FROM wallets WHERE total_balance <> savings_balance + referral_balance",
    )
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
