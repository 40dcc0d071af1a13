//! `referral_edges` closure table
//!
//! One row per (ancestor, descendant) pair with the distance between them.
//! Level 1 is the direct referrer.

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `referral_edges`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct EdgeRow {
    pub ancestor_id: String,
    pub descendant_id: String,
    pub level: i64,
    pub created_at: i64,
}

/// Descendant joined with its member record, for building a display tree
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct DownlineRow {
    pub user_id: String,
    pub full_name: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub level: i64,
    pub created_at: i64,
}

pub async fn insert_edge(conn: &mut SqliteConnection, row: &EdgeRow) -> StorageResult<()> {
    sqlx::query("INSERT INTO referral_edges (ancestor_id, descendant_id, level, created_at) VALUES (?, ?, ?, ?)")
        .bind(&row.ancestor_id)
        .bind(&row.descendant_id)
        .bind(row.level)
        .bind(row.created_at)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Copy the referrer's ancestors onto the new member one level further away.
///
/// Only referrer edges with `level <= max_source_level` are copied. Returns
/// the number of edges written.
pub async fn cascade_from_referrer(
    conn: &mut SqliteConnection,
    new_user_id: &str,
    referrer_id: &str,
    max_source_level: i64,
    now: i64,
) -> StorageResult<u64> {
    let result = sqlx::query(
        "INSERT INTO referral_edges (ancestor_id, descendant_id, level, created_at) \
         SELECT ancestor_id, ?, level + 1, ? FROM referral_edges \
         WHERE descendant_id = ? AND level <= ?",
    )
    .bind(new_user_id)
    .bind(now)
    .bind(referrer_id)
    .bind(max_source_level)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Link every ancestor of `user_id` to every existing descendant of `user_id`.
///
/// Used when a member who already has a downline is attached to a referrer.
/// Pairs further apart than `max_level` are skipped.
pub async fn attach_downline(
    conn: &mut SqliteConnection,
    user_id: &str,
    max_level: i64,
    now: i64,
) -> StorageResult<u64> {
    let result = sqlx::query(
        "INSERT INTO referral_edges (ancestor_id, descendant_id, level, created_at) \
         SELECT up.ancestor_id, down.descendant_id, up.level + down.level, ? \
         FROM referral_edges up JOIN referral_edges down ON down.ancestor_id = up.descendant_id \
         WHERE up.descendant_id = ? AND up.level + down.level <= ?",
    )
    .bind(now)
    .bind(user_id)
    .bind(max_level)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Ancestors of a member, nearest first
pub async fn ancestors_of(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Vec<EdgeRow>> {
    let rows = sqlx::query_as::<_, EdgeRow>(
        "SELECT * FROM referral_edges WHERE descendant_id = ? ORDER BY level",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// Downline of a member up to `max_level`, shallowest first
pub async fn downline(conn: &mut SqliteConnection, user_id: &str, max_level: i64) -> StorageResult<Vec<DownlineRow>> {
    let rows = sqlx::query_as::<_, DownlineRow>(
        "SELECT m.user_id, m.full_name, m.referral_code, m.referred_by, e.level, m.created_at \
         FROM referral_edges e JOIN members m ON m.user_id = e.descendant_id \
         WHERE e.ancestor_id = ? AND e.level <= ? \
         ORDER BY e.level, m.created_at, m.user_id",
    )
    .bind(user_id)
    .bind(max_level)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

/// `(level, descendant count)` for every populated level
pub async fn count_by_level(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Vec<(i64, i64)>> {
    let rows = sqlx::query_as(
        "SELECT level, COUNT(*) FROM referral_edges WHERE ancestor_id = ? GROUP BY level ORDER BY level",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}
