//! `members` and `investment_accounts` tables

use sqlx::{FromRow, SqliteConnection};

use crate::errors::StorageResult;

/// Row in `members`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct MemberRow {
    pub user_id: String,
    pub full_name: String,
    pub phone: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub created_at: i64,
}

/// Row in `investment_accounts`
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct AccountRow {
    pub account_id: String,
    pub user_id: String,
    pub account_number: String,
    pub account_name: String,
    pub is_primary: bool,
    pub created_at: i64,
}

// ============================================================================
// Members
// ============================================================================

pub async fn insert_member(conn: &mut SqliteConnection, row: &MemberRow) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO members (user_id, full_name, phone, referral_code, referred_by, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.user_id)
    .bind(&row.full_name)
    .bind(&row.phone)
    .bind(&row.referral_code)
    .bind(&row.referred_by)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_member(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Option<MemberRow>> {
    let row = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Lookup by referral code; codes are stored upper-case
pub async fn find_by_referral_code(conn: &mut SqliteConnection, code: &str) -> StorageResult<Option<MemberRow>> {
    let row = sqlx::query_as::<_, MemberRow>("SELECT * FROM members WHERE referral_code = ?")
        .bind(code)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn referral_code_exists(conn: &mut SqliteConnection, code: &str) -> StorageResult<bool> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM members WHERE referral_code = ?)")
        .bind(code)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

pub async fn phone_exists(conn: &mut SqliteConnection, phone: &str) -> StorageResult<bool> {
    let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM members WHERE phone = ?)")
        .bind(phone)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

/// Set the direct referrer once; returns false if one was already set
pub async fn set_referred_by(conn: &mut SqliteConnection, user_id: &str, referrer_id: &str) -> StorageResult<bool> {
    let result = sqlx::query("UPDATE members SET referred_by = ? WHERE user_id = ? AND referred_by IS NULL")
        .bind(referrer_id)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Whether `target` is `user_id` or anywhere on its `referred_by` chain.
///
/// Walks the full chain, so it sees ancestors beyond the edge table cap.
pub async fn upline_contains(conn: &mut SqliteConnection, user_id: &str, target: &str) -> StorageResult<bool> {
    let (found,): (bool,) = sqlx::query_as(
        "WITH RECURSIVE chain(user_id) AS ( \
             SELECT ? \
             UNION \
             SELECT m.referred_by FROM members m JOIN chain c ON m.user_id = c.user_id \
             WHERE m.referred_by IS NOT NULL \
         ) \
         SELECT EXISTS(SELECT 1 FROM chain WHERE user_id = ?)",
    )
    .bind(user_id)
    .bind(target)
    .fetch_one(&mut *conn)
    .await?;
    Ok(found)
}

/// Number of referrers above `user_id`, counted no further than `limit`
pub async fn upline_length(conn: &mut SqliteConnection, user_id: &str, limit: i64) -> StorageResult<i64> {
    let (length,): (i64,) = sqlx::query_as(
        "WITH RECURSIVE chain(user_id, depth) AS ( \
             SELECT referred_by, 1 FROM members WHERE user_id = ? AND referred_by IS NOT NULL \
             UNION ALL \
             SELECT m.referred_by, c.depth + 1 FROM members m JOIN chain c ON m.user_id = c.user_id \
             WHERE m.referred_by IS NOT NULL AND c.depth < ? \
         ) \
         SELECT COALESCE(MAX(depth), 0) FROM chain",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_one(&mut *conn)
    .await?;
    Ok(length)
}

/// Levels of downline below `user_id`, counted no further than `limit`
pub async fn downline_height(conn: &mut SqliteConnection, user_id: &str, limit: i64) -> StorageResult<i64> {
    let (height,): (i64,) = sqlx::query_as(
        "WITH RECURSIVE down(user_id, depth) AS ( \
             SELECT user_id, 1 FROM members WHERE referred_by = ? \
             UNION ALL \
             SELECT m.user_id, d.depth + 1 FROM members m JOIN down d ON m.referred_by = d.user_id \
             WHERE d.depth < ? \
         ) \
         SELECT COALESCE(MAX(depth), 0) FROM down",
    )
    .bind(user_id)
    .bind(limit)
    .fetch_one(&mut *conn)
    .await?;
    Ok(height)
}

pub async fn count_members(conn: &mut SqliteConnection) -> StorageResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM members")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

// ============================================================================
// Investment accounts
// ============================================================================

pub async fn insert_account(conn: &mut SqliteConnection, row: &AccountRow) -> StorageResult<()> {
    sqlx::query(
        "INSERT INTO investment_accounts (account_id, user_id, account_number, account_name, is_primary, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&row.account_id)
    .bind(&row.user_id)
    .bind(&row.account_number)
    .bind(&row.account_name)
    .bind(row.is_primary)
    .bind(row.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_account(conn: &mut SqliteConnection, account_id: &str) -> StorageResult<Option<AccountRow>> {
    let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM investment_accounts WHERE account_id = ?")
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Accounts of a member, primary first
pub async fn list_accounts(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<Vec<AccountRow>> {
    let rows = sqlx::query_as::<_, AccountRow>(
        "SELECT * FROM investment_accounts WHERE user_id = ? \
         ORDER BY is_primary DESC, account_number",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn count_accounts(conn: &mut SqliteConnection, user_id: &str) -> StorageResult<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM investment_accounts WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

pub async fn account_number_exists(conn: &mut SqliteConnection, account_number: &str) -> StorageResult<bool> {
    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM investment_accounts WHERE account_number = ?)")
            .bind(account_number)
            .fetch_one(&mut *conn)
            .await?;
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::errors::StorageError;
    use crate::ledger::test_support::seed_member;

    #[tokio::test]
    async fn test_referrer_is_set_only_once() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a", "9000000001").await;
        seed_member(&mut conn, "b", "9000000002").await;
        seed_member(&mut conn, "c", "9000000003").await;

        assert!(set_referred_by(&mut conn, "c", "a").await.unwrap());
        assert!(!set_referred_by(&mut conn, "c", "b").await.unwrap());
        let c = get_member(&mut conn, "c").await.unwrap().unwrap();
        assert_eq!(c.referred_by.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_chain_walks_ignore_edge_table() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();
        let ids = ["m0", "m1", "m2", "m3", "m4"];
        for (n, id) in ids.iter().enumerate() {
            seed_member(&mut conn, id, &format!("900000000{}", n)).await;
        }
        for pair in ids.windows(2) {
            assert!(set_referred_by(&mut conn, pair[1], pair[0]).await.unwrap());
        }

        assert!(upline_contains(&mut conn, "m4", "m0").await.unwrap());
        assert!(upline_contains(&mut conn, "m4", "m4").await.unwrap());
        assert!(!upline_contains(&mut conn, "m0", "m4").await.unwrap());

        assert_eq!(upline_length(&mut conn, "m4", 10).await.unwrap(), 4);
        assert_eq!(upline_length(&mut conn, "m4", 2).await.unwrap(), 2);
        assert_eq!(upline_length(&mut conn, "m0", 10).await.unwrap(), 0);
        assert_eq!(downline_height(&mut conn, "m0", 10).await.unwrap(), 4);
        assert_eq!(downline_height(&mut conn, "m0", 3).await.unwrap(), 3);
        assert_eq!(downline_height(&mut conn, "m4", 10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_phone_and_code_are_unique() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a", "9000000001").await;

        assert!(phone_exists(&mut conn, "9000000001").await.unwrap());
        assert!(referral_code_exists(&mut conn, "REF9000000001").await.unwrap());
        assert!(find_by_referral_code(&mut conn, "REF9000000001").await.unwrap().is_some());

        let dup = MemberRow {
            user_id: "z".to_string(),
            full_name: "Z".to_string(),
            phone: "9000000001".to_string(),
            referral_code: "REF000000".to_string(),
            referred_by: None,
            created_at: 1,
        };
        let err = insert_member(&mut conn, &dup).await.unwrap_err();
        assert!(matches!(err, StorageError::UniqueViolation(_)));
        assert!(err.is_unique_on("members.phone"));
    }

    #[tokio::test]
    async fn test_accounts_list_primary_first() {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let mut conn = backend.pool().acquire().await.unwrap();
        seed_member(&mut conn, "a", "9000000001").await;

        for (idx, primary) in [(2, false), (1, true)] {
            insert_account(
                &mut conn,
                &AccountRow {
                    account_id: format!("acc{}", idx),
                    user_id: "a".to_string(),
                    account_number: format!("INV123456-{:03}", idx),
                    account_name: format!("Account {}", idx),
                    is_primary: primary,
                    created_at: idx,
                },
            )
            .await
            .unwrap();
        }

        let accounts = list_accounts(&mut conn, "a").await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert!(accounts[0].is_primary);
        assert_eq!(count_accounts(&mut conn, "a").await.unwrap(), 2);
        assert!(account_number_exists(&mut conn, "INV123456-002").await.unwrap());
    }
}
