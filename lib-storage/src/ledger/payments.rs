//! `payments` and `gold_holdings` tables

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `payments`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PaymentRow {
    pub payment_id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub kind: String,
    pub month_number: i64,
    /// Paise
    pub amount: i64,
    /// Paise per gram
    pub gold_rate: i64,
    pub gold_milligrams: f64,
    pub status: String,
    pub gateway_order_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub created_at: i64,
}

/// Row in `gold_holdings`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct HoldingRow {
    pub holding_id: i64,
    pub user_id: String,
    pub subscription_id: String,
    pub payment_id: String,
    pub amount_paid: i64,
    pub gold_rate: i64,
    pub gold_milligrams: f64,
    pub kind: String,
    pub created_at: i64,
}

pub async fn insert_payment(conn: &mut SqliteConnection, row: &PaymentRow) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO payments (payment_id, subscription_id, user_id, kind, month_number, amount, gold_rate, \
         gold_milligrams, status, gateway_order_id, gateway_payment_id, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.payment_id)
    .bind(&row.subscription_id)
    .bind(&row.user_id)
    .bind(&row.kind)
    .bind(row.month_number)
    .bind(row.amount)
    .bind(row.gold_rate)
    .bind(row.gold_milligrams)
    .bind(&row.status)
    .bind(&row.gateway_order_id)
    .bind(&row.gateway_payment_id)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Completed payments of one kind for a subscription
pub async fn count_completed(conn: &mut SqliteConnection, subscription_id: &str, kind: &str) -> StorageResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM payments WHERE subscription_id = ? AND kind = ? AND status = 'completed'",
    )
    .bind(subscription_id)
    .bind(kind)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}

/// Payments of a subscription in schedule order, failed attempts included
pub async fn list_for_subscription(
    conn: &mut SqliteConnection,
    subscription_id: &str,
) -> StorageResult<Vec<PaymentRow>> {
    let rows = sqlx::query_as::<_, PaymentRow>(
        "SELECT * FROM payments WHERE subscription_id = ? ORDER BY created_at, month_number, kind DESC",
    )
    .bind(subscription_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Gold holdings
// ============================================================================

pub async fn insert_holding(
    conn: &mut SqliteConnection,
    payment: &PaymentRow,
    holding_kind: &str,
) -> StorageResult<i64> {
    let result = sqlx::query(
        "INSERT INTO gold_holdings (user_id, subscription_id, payment_id, amount_paid, gold_rate, \
         gold_milligrams, kind, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&payment.user_id)
    .bind(&payment.subscription_id)
    .bind(&payment.payment_id)
    .bind(payment.amount)
    .bind(payment.gold_rate)
    .bind(payment.gold_milligrams)
    .bind(holding_kind)
    .bind(payment.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn holdings_for_user(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Vec<HoldingRow>> {
    let rows = sqlx::query_as::<_, HoldingRow>(
        "SELECT * FROM gold_holdings WHERE user_id = ? ORDER BY holding_id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Total gold credited to a subscription, bonus included
pub async fn gold_for_subscription(conn: &mut SqliteConnection, subscription_id: &str) -> StorageResult<f64> {
    let (total,): (f64,) = sqlx::query_as(
        "SELECT CAST(COALESCE(SUM(gold_milligrams), 0) AS REAL) FROM gold_holdings WHERE subscription_id = ?",
    )
    .bind(subscription_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(total)
}
