//! Member registry
//!
//! Registration creates the member, an empty wallet, the primary investment
//! account and the referral edges in a single transaction.

use chrono::{DateTime, Utc};
use lib_storage::ledger::{members, now_unix, wallets};
use lib_storage::{SqliteBackend, SqliteConnection};
use lib_types::{AccountId, UserId, MAX_ACCOUNTS_PER_USER};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RetryConfig;
use crate::convert::{parse_field, parse_opt_field, timestamp};
use crate::errors::{LedgerError, LedgerResult};
use crate::referrals::{Ancestor, ReferralGraph};
use crate::retry::with_conflict_retry;

/// Minimum digits in a phone number after sanitizing
pub const MIN_PHONE_DIGITS: usize = 10;

/// Attempts at drawing an unused random code before giving up
const CODE_ATTEMPTS: usize = 32;

/// Registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMember {
    pub full_name: String,
    pub phone: String,
    #[serde(default)]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub full_name: String,
    pub phone: String,
    pub referral_code: String,
    pub referred_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<members::MemberRow> for Member {
    type Error = LedgerError;

    fn try_from(row: members::MemberRow) -> LedgerResult<Self> {
        Ok(Self {
            user_id: parse_field(&row.user_id, "member id")?,
            full_name: row.full_name,
            phone: row.phone,
            referral_code: row.referral_code,
            referred_by: parse_opt_field(row.referred_by.as_deref(), "referrer id")?,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Investment account under a member's login
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentAccount {
    pub account_id: AccountId,
    pub user_id: UserId,
    /// `INV######-NNN`
    pub account_number: String,
    pub account_name: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<members::AccountRow> for InvestmentAccount {
    type Error = LedgerError;

    fn try_from(row: members::AccountRow) -> LedgerResult<Self> {
        Ok(Self {
            account_id: parse_field(&row.account_id, "account id")?,
            user_id: parse_field(&row.user_id, "account owner")?,
            account_number: row.account_number,
            account_name: row.account_name,
            is_primary: row.is_primary,
            created_at: timestamp(row.created_at)?,
        })
    }
}

/// Result of a successful registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub member: Member,
    pub primary_account: InvestmentAccount,
    /// Upline the member joined under, nearest first
    pub ancestors: Vec<Ancestor>,
}

/// Keep the digits of a phone number
pub fn sanitize_phone(phone: &str) -> LedgerResult<String> {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < MIN_PHONE_DIGITS {
        return Err(LedgerError::InvalidInput(format!(
            "phone number needs at least {} digits",
            MIN_PHONE_DIGITS
        )));
    }
    Ok(digits)
}

fn six_digits() -> u32 {
    rand::thread_rng().gen_range(100_000..1_000_000)
}

fn account_number(prefix: &str, index: usize) -> String {
    format!("{}-{:03}", prefix, index)
}

#[derive(Debug, Clone)]
pub struct MemberRegistry {
    backend: SqliteBackend,
    graph: ReferralGraph,
    retry: RetryConfig,
}

impl MemberRegistry {
    pub fn new(backend: SqliteBackend, graph: ReferralGraph, retry: RetryConfig) -> Self {
        Self { backend, graph, retry }
    }

    pub async fn register(&self, request: &NewMember) -> LedgerResult<Registration> {
        let full_name = request.full_name.trim();
        if full_name.is_empty() {
            return Err(LedgerError::InvalidInput("full name is empty".into()));
        }
        let phone = sanitize_phone(&request.phone)?;
        let phone = phone.as_str();
        let code = request
            .referral_code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());

        let registration = with_conflict_retry(&self.retry, "member registration", || async move {
            let mut tx = self.backend.begin().await?;
            if members::phone_exists(&mut tx, phone).await? {
                return Err(LedgerError::InvalidInput(format!("phone {} is already registered", phone)));
            }
            let referrer = match code {
                Some(code) => Some(ReferralGraph::resolve_referral_code_in(&mut tx, code).await?),
                None => None,
            };

            let now = now_unix();
            let user_id = UserId::generate();
            let row = members::MemberRow {
                user_id: user_id.to_string(),
                full_name: full_name.to_string(),
                phone: phone.to_string(),
                referral_code: Self::unused_referral_code(&mut tx).await?,
                referred_by: None,
                created_at: now,
            };
            members::insert_member(&mut tx, &row).await?;
            wallets::ensure_wallet(&mut tx, &row.user_id, now).await?;

            let prefix = Self::unused_account_prefix(&mut tx).await?;
            let primary_account = Self::insert_account_in(
                &mut tx,
                user_id,
                account_number(&prefix, 1),
                "Primary Account".to_string(),
                true,
            )
            .await?;

            if let Some(referrer_id) = referrer {
                self.graph.register_referral_in(&mut tx, user_id, referrer_id).await?;
            }
            let ancestors = ReferralGraph::ancestors_in(&mut tx, user_id).await?;
            let member = match members::get_member(&mut tx, &row.user_id).await? {
                Some(stored) => Member::try_from(stored)?,
                None => return Err(LedgerError::not_found("member", user_id)),
            };
            SqliteBackend::commit(tx).await?;

            Ok(Registration {
                member,
                primary_account,
                ancestors,
            })
        })
        .await?;

        info!(
            user_id = %registration.member.user_id,
            referral_code = %registration.member.referral_code,
            referred_by = ?registration.member.referred_by,
            "member registered"
        );
        Ok(registration)
    }

    /// Open another investment account for an existing member
    pub async fn open_account(&self, user_id: UserId, name: &str) -> LedgerResult<InvestmentAccount> {
        let name = name.trim();
        let account = with_conflict_retry(&self.retry, "open account", || async move {
            let mut tx = self.backend.begin().await?;
            let uid = user_id.to_string();
            if members::get_member(&mut tx, &uid).await?.is_none() {
                return Err(LedgerError::not_found("member", user_id));
            }

            let existing = members::list_accounts(&mut tx, &uid).await?;
            if existing.len() >= MAX_ACCOUNTS_PER_USER {
                return Err(LedgerError::AccountLimitReached {
                    user_id,
                    limit: MAX_ACCOUNTS_PER_USER,
                });
            }
            let prefix = match existing.iter().find(|a| a.is_primary).or(existing.first()) {
                Some(account) => account
                    .account_number
                    .split_once('-')
                    .map(|(prefix, _)| prefix.to_string())
                    .ok_or_else(|| LedgerError::corrupt("account number", &account.account_number))?,
                None => Self::unused_account_prefix(&mut tx).await?,
            };

            let index = existing.len() + 1;
            let account_name = if name.is_empty() {
                format!("Investment Account {}", index)
            } else {
                name.to_string()
            };
            let account = Self::insert_account_in(
                &mut tx,
                user_id,
                account_number(&prefix, index),
                account_name,
                existing.is_empty(),
            )
            .await?;
            SqliteBackend::commit(tx).await?;
            Ok(account)
        })
        .await?;

        info!(user_id = %user_id, account_number = %account.account_number, "investment account opened");
        Ok(account)
    }

    /// Accounts of a member, primary first
    pub async fn accounts(&self, user_id: UserId) -> LedgerResult<Vec<InvestmentAccount>> {
        let mut conn = self.backend.acquire().await?;
        members::list_accounts(&mut conn, &user_id.to_string())
            .await?
            .into_iter()
            .map(InvestmentAccount::try_from)
            .collect()
    }

    pub async fn member(&self, user_id: UserId) -> LedgerResult<Member> {
        let mut conn = self.backend.acquire().await?;
        members::get_member(&mut conn, &user_id.to_string())
            .await?
            .ok_or_else(|| LedgerError::not_found("member", user_id))?
            .try_into()
    }

    pub async fn member_count(&self) -> LedgerResult<u64> {
        let mut conn = self.backend.acquire().await?;
        let count = members::count_members(&mut conn).await?;
        u64::try_from(count).map_err(|e| LedgerError::corrupt("member count", e))
    }

    async fn insert_account_in(
        conn: &mut SqliteConnection,
        user_id: UserId,
        account_number: String,
        account_name: String,
        is_primary: bool,
    ) -> LedgerResult<InvestmentAccount> {
        let row = members::AccountRow {
            account_id: AccountId::generate().to_string(),
            user_id: user_id.to_string(),
            account_number,
            account_name,
            is_primary,
            created_at: now_unix(),
        };
        members::insert_account(conn, &row).await?;
        debug!(user_id = %user_id, account_number = %row.account_number, is_primary, "account row inserted");
        InvestmentAccount::try_from(row)
    }

    async fn unused_referral_code(conn: &mut SqliteConnection) -> LedgerResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = format!("REF{}", six_digits());
            if !members::referral_code_exists(conn, &code).await? {
                return Ok(code);
            }
        }
        Err(LedgerError::PersistenceConflict("no unused referral code found".into()))
    }

    async fn unused_account_prefix(conn: &mut SqliteConnection) -> LedgerResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let prefix = format!("INV{}", six_digits());
            if !members::account_number_exists(conn, &account_number(&prefix, 1)).await? {
                return Ok(prefix);
            }
        }
        Err(LedgerError::PersistenceConflict("no unused account number found".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DepthPolicy;

    async fn registry() -> MemberRegistry {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        };
        let graph = ReferralGraph::new(backend.clone(), 10, DepthPolicy::Truncate, retry.clone());
        MemberRegistry::new(backend, graph, retry)
    }

    fn request(name: &str, phone: &str, code: Option<&str>) -> NewMember {
        NewMember {
            full_name: name.to_string(),
            phone: phone.to_string(),
            referral_code: code.map(str::to_string),
        }
    }

    #[test]
    fn test_sanitize_phone() {
        assert_eq!(sanitize_phone("+91 98765-43210").unwrap(), "919876543210");
        assert!(matches!(sanitize_phone("12345"), Err(LedgerError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_register_creates_member_wallet_and_primary_account() {
        let registry = registry().await;
        let reg = registry.register(&request(" Asha ", "98765 43210", None)).await.unwrap();

        assert_eq!(reg.member.full_name, "Asha");
        assert_eq!(reg.member.phone, "9876543210");
        assert!(reg.member.referral_code.starts_with("REF"));
        assert_eq!(reg.member.referral_code.len(), 9);
        assert!(reg.ancestors.is_empty());

        assert!(reg.primary_account.is_primary);
        assert!(reg.primary_account.account_number.starts_with("INV"));
        assert!(reg.primary_account.account_number.ends_with("-001"));

        let mut conn = registry.backend.acquire().await.unwrap();
        assert!(wallets::get_wallet(&mut conn, &reg.member.user_id.to_string())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_register_with_referral_code() {
        let registry = registry().await;
        let a = registry.register(&request("A", "9000000001", None)).await.unwrap();
        let code = a.member.referral_code.to_lowercase();
        let b = registry.register(&request("B", "9000000002", Some(&code))).await.unwrap();
        let c = registry
            .register(&request("C", "9000000003", Some(&b.member.referral_code)))
            .await
            .unwrap();

        assert_eq!(b.member.referred_by, Some(a.member.user_id));
        assert_eq!(c.ancestors.len(), 2);
        assert_eq!(c.ancestors[0].ancestor_id, b.member.user_id);
        assert_eq!(c.ancestors[1].ancestor_id, a.member.user_id);
        assert_eq!(c.ancestors[1].level, 2);
    }

    #[tokio::test]
    async fn test_unknown_code_leaves_no_member() {
        let registry = registry().await;
        let err = registry
            .register(&request("A", "9000000001", Some("REF000000")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidReferrer(_)));
        assert_eq!(registry.member_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_phone_rejected() {
        let registry = registry().await;
        registry.register(&request("A", "9000000001", None)).await.unwrap();
        let err = registry.register(&request("B", "900-000-0001", None)).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
        assert_eq!(registry.member_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_account_limit() {
        let registry = registry().await;
        let reg = registry.register(&request("A", "9000000001", None)).await.unwrap();
        let user = reg.member.user_id;
        let prefix = reg.primary_account.account_number.split_once('-').unwrap().0.to_string();

        for n in 2..=MAX_ACCOUNTS_PER_USER {
            let account = registry.open_account(user, "").await.unwrap();
            assert_eq!(account.account_number, format!("{}-{:03}", prefix, n));
            assert!(!account.is_primary);
        }
        let err = registry.open_account(user, "One too many").await.unwrap_err();
        assert!(matches!(err, LedgerError::AccountLimitReached { limit: 10, .. }));

        let accounts = registry.accounts(user).await.unwrap();
        assert_eq!(accounts.len(), MAX_ACCOUNTS_PER_USER);
        assert!(accounts[0].is_primary);
    }

    #[tokio::test]
    async fn test_open_account_for_unknown_member() {
        let registry = registry().await;
        assert!(matches!(
            registry.open_account(UserId::generate(), "Savings").await,
            Err(LedgerError::NotFound { entity: "member", .. })
        ));
    }
}
