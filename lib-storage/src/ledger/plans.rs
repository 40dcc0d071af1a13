//! `plans` table

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `plans`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct PlanRow {
    pub plan_id: String,
    pub name: String,
    /// Paise
    pub monthly_amount: i64,
    pub duration_months: i64,
    pub payment_months: i64,
    /// Decimal text, display only
    pub bonus_percentage: Option<String>,
    /// Paise
    pub bonus_amount: Option<i64>,
    pub active: bool,
    pub created_at: i64,
}

pub async fn insert_plan(conn: &mut SqliteConnection, row: &PlanRow) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO plans (plan_id, name, monthly_amount, duration_months, payment_months, \
         bonus_percentage, bonus_amount, active, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.plan_id)
    .bind(&row.name)
    .bind(row.monthly_amount)
    .bind(row.duration_months)
    .bind(row.payment_months)
    .bind(&row.bonus_percentage)
    .bind(row.bonus_amount)
    .bind(row.active)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_plan(conn: &mut SqliteConnection, plan_id: &str) -> StorageResult<Option<PlanRow>> {
    let row = sqlx::query_as::<_, PlanRow>("SELECT * FROM plans WHERE plan_id = ?")
        .bind(plan_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn find_plan_by_name(conn: &mut SqliteConnection, name: &str) -> StorageResult<Option<PlanRow>> {
    let row = sqlx::query_as::<_, PlanRow>(
        "SELECT * FROM plans WHERE name = ? ORDER BY created_at LIMIT 1",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn list_plans(conn: &mut SqliteConnection, active_only: bool) -> StorageResult<Vec<PlanRow>> {
    let rows = sqlx::query_as::<_, PlanRow>(
        "SELECT * FROM plans WHERE (? = 0 OR active = 1) ORDER BY monthly_amount, name",
    )
    .bind(active_only)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Overwrite the mutable plan terms; returns whether the plan existed
pub async fn update_plan_terms(conn: &mut SqliteConnection, row: &PlanRow) -> StorageResult<bool> {
    let result = sqlx::query(
        "UPDATE plans SET name = ?, monthly_amount = ?, duration_months = ?, payment_months = ?, \
         bonus_percentage = ?, bonus_amount = ? WHERE plan_id = ?",
    )
    .bind(&row.name)
    .bind(row.monthly_amount)
    .bind(row.duration_months)
    .bind(row.payment_months)
    .bind(&row.bonus_percentage)
    .bind(row.bonus_amount)
    .bind(&row.plan_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_plan_active(conn: &mut SqliteConnection, plan_id: &str, active: bool) -> StorageResult<bool> {
    let result = sqlx::query("UPDATE plans SET active = ? WHERE plan_id = ?")
        .bind(active)
        .bind(plan_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Active subscriptions currently referencing the plan
pub async fn count_active_subscriptions(conn: &mut SqliteConnection, plan_id: &str) -> StorageResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM subscriptions WHERE plan_id = ? AND status = 'active'",
    )
    .bind(plan_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(count)
}
