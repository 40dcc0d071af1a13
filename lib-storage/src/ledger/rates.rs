//! `gold_rates` table

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `gold_rates`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct RateRow {
    pub rate_id: i64,
    /// Paise per gram
    pub rate_per_gram: i64,
    /// `YYYY-MM-DD`
    pub rate_date: String,
    pub published_at: i64,
}

/// Publish a rate; returns the stored row
pub async fn insert_rate(
    conn: &mut SqliteConnection,
    rate_per_gram: i64,
    rate_date: &str,
    published_at: i64,
) -> StorageResult<RateRow> {
    let result = sqlx::query("INSERT INTO gold_rates (rate_per_gram, rate_date, published_at) VALUES (?, ?, ?)")
        .bind(rate_per_gram)
        .bind(rate_date)
        .bind(published_at)
        .execute(&mut *conn)
        .await?;
    Ok(RateRow {
        rate_id: result.last_insert_rowid(),
        rate_per_gram,
        rate_date: rate_date.to_string(),
        published_at,
    })
}

/// Latest rate published at or before `at`; ties go to the later insert
pub async fn latest_at_or_before(conn: &mut SqliteConnection, at: i64) -> StorageResult<Option<RateRow>> {
    let row = sqlx::query_as::<_, RateRow>(
        "SELECT * FROM gold_rates WHERE published_at <= ? ORDER BY published_at DESC, rate_id DESC LIMIT 1",
    )
    .bind(at)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}
