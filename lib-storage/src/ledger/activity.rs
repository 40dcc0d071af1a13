//! `ledger_transactions` activity log

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `ledger_transactions`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ActivityRow {
    pub tx_id: i64,
    pub user_id: String,
    pub account_id: Option<String>,
    pub kind: String,
    /// Paise
    pub amount: i64,
    pub reference: Option<String>,
    pub description: String,
    pub created_at: i64,
}

/// Append an entry; `tx_id` on the input is ignored
pub async fn append(conn: &mut SqliteConnection, row: &ActivityRow) -> StorageResult<i64> {
    let result = sqlx::query(
        "INSERT INTO ledger_transactions (user_id, account_id, kind, amount, reference, description, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.user_id)
    .bind(&row.account_id)
    .bind(&row.kind)
    .bind(row.amount)
    .bind(&row.reference)
    .bind(&row.description)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest entries first
pub async fn recent_for_user(conn: &mut SqliteConnection, user_id: &str, limit: i64) -> StorageResult<Vec<ActivityRow>> {
    let rows = sqlx::query_as::<_, ActivityRow>(
        "SELECT * FROM ledger_transactions WHERE user_id = ? ORDER BY created_at DESC, tx_id DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
