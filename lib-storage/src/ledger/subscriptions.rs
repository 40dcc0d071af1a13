//! `subscriptions` table

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `subscriptions`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct SubscriptionRow {
    pub subscription_id: String,
    pub user_id: String,
    pub account_id: Option<String>,
    pub plan_id: String,
    /// `YYYY-MM-DD`
    pub start_date: String,
    /// `YYYY-MM-DD`
    pub end_date: String,
    pub status: String,
    pub total_paid: i64,
    pub bonus_amount: i64,
    pub final_amount: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

pub async fn insert_subscription(conn: &mut SqliteConnection, row: &SubscriptionRow) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO subscriptions (subscription_id, user_id, account_id, plan_id, start_date, end_date, \
         status, total_paid, bonus_amount, final_amount, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.subscription_id)
    .bind(&row.user_id)
    .bind(&row.account_id)
    .bind(&row.plan_id)
    .bind(&row.start_date)
    .bind(&row.end_date)
    .bind(&row.status)
    .bind(row.total_paid)
    .bind(row.bonus_amount)
    .bind(row.final_amount)
    .bind(row.created_at)
    .bind(row.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_subscription(
    conn: &mut SqliteConnection,
    subscription_id: &str,
) -> StorageResult<Option<SubscriptionRow>> {
    let row = sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE subscription_id = ?")
        .bind(subscription_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Active subscription for a member slot; `None` account is its own slot
pub async fn find_active(
    conn: &mut SqliteConnection,
    user_id: &str,
    account_id: Option<&str>,
) -> StorageResult<Option<SubscriptionRow>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT * FROM subscriptions \
         WHERE user_id = ? AND IFNULL(account_id, '') = IFNULL(?, '') AND status = 'active'",
    )
    .bind(user_id)
    .bind(account_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn list_for_user(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Vec<SubscriptionRow>> {
    let rows = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT * FROM subscriptions WHERE user_id = ? ORDER BY created_at DESC, subscription_id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Add a completed installment to `total_paid`; only active rows move
pub async fn add_to_total_paid(
    conn: &mut SqliteConnection,
    subscription_id: &str,
    amount: i64,
    now: i64,
) -> StorageResult<bool> {
    let result = sqlx::query(
        "UPDATE subscriptions SET total_paid = total_paid + ?, updated_at = ? \
         WHERE subscription_id = ? AND status = 'active'",
    )
    .bind(amount)
    .bind(now)
    .bind(subscription_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Close an active subscription with its bonus; `final_amount = total_paid + bonus`
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    subscription_id: &str,
    bonus_amount: i64,
    now: i64,
) -> StorageResult<bool> {
    let result = sqlx::query(
        "UPDATE subscriptions SET status = 'completed', bonus_amount = ?, final_amount = total_paid + ?, \
         updated_at = ? WHERE subscription_id = ? AND status = 'active'",
    )
    .bind(bonus_amount)
    .bind(bonus_amount)
    .bind(now)
    .bind(subscription_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_cancelled(conn: &mut SqliteConnection, subscription_id: &str, now: i64) -> StorageResult<bool> {
    let result = sqlx::query(
        "UPDATE subscriptions SET status = 'cancelled', updated_at = ? \
         WHERE subscription_id = ? AND status = 'active'",
    )
    .bind(now)
    .bind(subscription_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
