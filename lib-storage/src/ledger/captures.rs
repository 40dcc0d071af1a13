//! `gateway_captures` table: gateway payment ids already applied

use sqlx::SqliteConnection;

use crate::errors::StorageResult;

/// Constraint reported when a gateway payment id is reused
pub const CAPTURE_UNIQUE: &str = "gateway_captures.gateway_payment_id";

/// Consume a gateway capture.
///
/// A second insert with the same gateway payment id fails with a unique
/// violation on [`CAPTURE_UNIQUE`].
pub async fn insert_capture(
    conn: &mut SqliteConnection,
    gateway_payment_id: &str,
    gateway_order_id: &str,
    user_id: &str,
    purpose: &str,
    amount: i64,
    now: i64,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO gateway_captures (gateway_payment_id, gateway_order_id, user_id, purpose, amount, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(gateway_payment_id)
    .bind(gateway_order_id)
    .bind(user_id)
    .bind(purpose)
    .bind(amount)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn capture_exists(conn: &mut SqliteConnection, gateway_payment_id: &str) -> StorageResult<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM gateway_captures WHERE gateway_payment_id = ?)")
            .bind(gateway_payment_id)
            .fetch_one(&mut *conn)
            .await?;
    Ok(exists)
}
