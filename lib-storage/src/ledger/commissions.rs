//! `commission_sources`, `commission_records` and `level_config` tables

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `commission_records`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CommissionRow {
    pub record_id: i64,
    pub ancestor_id: String,
    pub from_user_id: String,
    pub level: i64,
    /// Paise
    pub amount: i64,
    /// Decimal text
    pub percentage: String,
    pub source_payment_id: String,
    pub created_at: i64,
}

/// Row in `level_config`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LevelRow {
    pub level: i64,
    pub percentage: String,
    pub updated_at: i64,
}

/// Claim a source payment for propagation.
///
/// Fails with a unique violation on `commission_sources.source_payment_id`
/// if the payment was already processed.
pub async fn insert_source(
    conn: &mut SqliteConnection,
    source_payment_id: &str,
    paying_user_id: &str,
    payment_amount: i64,
    now: i64,
) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO commission_sources (source_payment_id, paying_user_id, payment_amount, processed_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(source_payment_id)
    .bind(paying_user_id)
    .bind(payment_amount)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Append a commission record; returns its id
pub async fn insert_record(conn: &mut SqliteConnection, row: &CommissionRow) -> StorageResult<i64> {
    let result = sqlx::query(
        "INSERT INTO commission_records (ancestor_id, from_user_id, level, amount, percentage, \
         source_payment_id, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.ancestor_id)
    .bind(&row.from_user_id)
    .bind(row.level)
    .bind(row.amount)
    .bind(&row.percentage)
    .bind(&row.source_payment_id)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent records earned by an ancestor
pub async fn records_for_ancestor(
    conn: &mut SqliteConnection,
    ancestor_id: &str,
    limit: i64,
) -> StorageResult<Vec<CommissionRow>> {
    let rows = sqlx::query_as::<_, CommissionRow>(
        "SELECT * FROM commission_records WHERE ancestor_id = ? \
         ORDER BY created_at DESC, record_id DESC LIMIT ?",
    )
    .bind(ancestor_id)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn records_for_source(
    conn: &mut SqliteConnection,
    source_payment_id: &str,
) -> StorageResult<Vec<CommissionRow>> {
    let rows = sqlx::query_as::<_, CommissionRow>(
        "SELECT * FROM commission_records WHERE source_payment_id = ? ORDER BY level",
    )
    .bind(source_payment_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// `(level, paise earned)` per level for an ancestor
pub async fn totals_by_level(conn: &mut SqliteConnection, ancestor_id: &str) -> StorageResult<Vec<(i64, i64)>> {
    let rows = sqlx::query_as(
        "SELECT level, SUM(amount) FROM commission_records WHERE ancestor_id = ? GROUP BY level ORDER BY level",
    )
    .bind(ancestor_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

// ============================================================================
// Level configuration
// ============================================================================

pub async fn upsert_level(conn: &mut SqliteConnection, level: i64, percentage: &str, now: i64) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO level_config (level, percentage, updated_at) VALUES (?, ?, ?) \
         ON CONFLICT(level) DO UPDATE SET percentage = excluded.percentage, updated_at = excluded.updated_at",
    )
    .bind(level)
    .bind(percentage)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_level(conn: &mut SqliteConnection, level: i64) -> StorageResult<bool> {
    let result = sqlx::query("DELETE FROM level_config WHERE level = ?")
        .bind(level)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list_levels(conn: &mut SqliteConnection) -> StorageResult<Vec<LevelRow>> {
    let rows = sqlx::query_as::<_, LevelRow>("SELECT * FROM level_config ORDER BY level")
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::ledger::test_support::seed_member;

    fn record(ancestor: &str, level: i64, amount: i64, source: &str) -> CommissionRow {
        CommissionRow {
            record_id: 0,
            ancestor_id: ancestor.to_string(),
            from_user_id: "payer".to_string(),
            level,
            amount,
            percentage: "10".to_string(),
            source_payment_id: source.to_string(),
            created_at: 5,
        }
    }

    #[tokio::test]
    async fn test_source_claim_is_unique() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();

        insert_source(&mut conn, "pay-1", "payer", 100_000, 1).await.unwrap();
        let err = insert_source(&mut conn, "pay-1", "payer", 100_000, 2).await.unwrap_err();
        assert!(err.is_unique_on("commission_sources.source_payment_id"));
    }

    #[tokio::test]
    async fn test_records_and_totals() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a", "1").await;
        insert_source(&mut conn, "pay-1", "payer", 100_000, 1).await.unwrap();
        insert_source(&mut conn, "pay-2", "payer", 100_000, 1).await.unwrap();

        insert_record(&mut conn, &record("a", 1, 10_000, "pay-1")).await.unwrap();
        insert_record(&mut conn, &record("a", 1, 10_000, "pay-2")).await.unwrap();
        assert!(insert_record(&mut conn, &record("a", 1, 10_000, "pay-2")).await.is_err());

        assert_eq!(records_for_ancestor(&mut conn, "a", 10).await.unwrap().len(), 2);
        assert_eq!(records_for_ancestor(&mut conn, "a", 1).await.unwrap().len(), 1);
        assert_eq!(records_for_source(&mut conn, "pay-1").await.unwrap().len(), 1);
        assert_eq!(totals_by_level(&mut conn, "a").await.unwrap(), vec![(1, 20_000)]);
    }

    #[tokio::test]
    async fn test_level_upsert() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();

        upsert_level(&mut conn, 1, "10", 1).await.unwrap();
        upsert_level(&mut conn, 2, "5", 1).await.unwrap();
        upsert_level(&mut conn, 1, "12.5", 2).await.unwrap();

        let levels = list_levels(&mut conn).await.unwrap();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].percentage, "12.5");
        assert!(delete_level(&mut conn, 2).await.unwrap());
        assert!(!delete_level(&mut conn, 2).await.unwrap());
    }
}
