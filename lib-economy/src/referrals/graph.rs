//! Referral graph
//!
//! Stored as a closure table: a member joining under a referrer gets a
//! level-1 edge to the referrer plus a copy of each of the referrer's
//! ancestor edges one level further away. Reading a member's upline is then a
//! single indexed query instead of a walk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use lib_storage::ledger::{commissions, members, now_unix, referrals};
use lib_storage::{SqliteBackend, SqliteConnection};
use lib_types::{Amount, Percentage, UserId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{DepthPolicy, RetryConfig};
use crate::convert::{count, from_minor, parse_field, timestamp};
use crate::errors::{LedgerError, LedgerResult};
use crate::retry::with_conflict_retry;

/// An upline member and its distance from the descendant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ancestor {
    pub ancestor_id: UserId,
    pub level: u32,
}

/// Downline member with its own direct referrals nested below it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferralNode {
    pub user_id: UserId,
    pub full_name: String,
    pub referral_code: String,
    /// Distance from the member whose tree this is
    pub level: u32,
    pub joined_at: DateTime<Utc>,
    pub children: Vec<ReferralNode>,
}

impl ReferralNode {
    /// Members in this subtree, excluding the node itself
    pub fn descendant_count(&self) -> usize {
        self.children.iter().map(|c| 1 + c.descendant_count()).sum()
    }
}

/// Per-level referral statistics for one member
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSummary {
    pub level: u32,
    pub referral_count: u32,
    pub commission_total: Amount,
    /// Configured percentage, `None` when the level earns nothing
    pub percentage: Option<Percentage>,
}

/// Normalized form of a referral code
pub fn normalize_referral_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[derive(Debug, Clone)]
pub struct ReferralGraph {
    backend: SqliteBackend,
    max_depth: u32,
    policy: DepthPolicy,
    retry: RetryConfig,
}

impl ReferralGraph {
    pub fn new(backend: SqliteBackend, max_depth: u32, policy: DepthPolicy, retry: RetryConfig) -> Self {
        Self {
            backend,
            max_depth: max_depth.max(1),
            policy,
            retry,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Attach `new_user_id` below `referrer_id`; one-time
    pub async fn register_referral(&self, new_user_id: UserId, referrer_id: UserId) -> LedgerResult<Vec<Ancestor>> {
        with_conflict_retry(&self.retry, "register referral", || async move {
            let mut tx = self.backend.begin().await?;
            self.register_referral_in(&mut tx, new_user_id, referrer_id).await?;
            let ancestors = Self::ancestors_in(&mut tx, new_user_id).await?;
            SqliteBackend::commit(tx).await?;
            Ok(ancestors)
        })
        .await
    }

    pub(crate) async fn register_referral_in(
        &self,
        conn: &mut SqliteConnection,
        new_user_id: UserId,
        referrer_id: UserId,
    ) -> LedgerResult<()> {
        if new_user_id == referrer_id {
            return Err(LedgerError::InvalidReferrer("a member cannot refer themselves".into()));
        }
        let new_uid = new_user_id.to_string();
        let referrer_uid = referrer_id.to_string();

        if members::get_member(conn, &referrer_uid).await?.is_none() {
            return Err(LedgerError::InvalidReferrer(format!("unknown member {}", referrer_id)));
        }
        let member = members::get_member(conn, &new_uid)
            .await?
            .ok_or_else(|| LedgerError::not_found("member", new_user_id))?;
        if member.referred_by.is_some() {
            return Err(LedgerError::ReferrerAlreadyAssigned(new_user_id));
        }
        if members::upline_contains(conn, &referrer_uid, &new_uid).await? {
            return Err(LedgerError::InvalidReferrer(format!(
                "{} is in the downline of {}",
                referrer_id, new_user_id
            )));
        }

        if self.policy == DepthPolicy::Reject {
            let limit = i64::from(self.max_depth) + 1;
            let referrer_depth = count(members::upline_length(conn, &referrer_uid, limit).await?, "referral depth")?;
            let downline_depth = count(members::downline_height(conn, &new_uid, limit).await?, "downline depth")?;
            if referrer_depth + 1 + downline_depth > self.max_depth {
                return Err(LedgerError::MaxDepthExceeded {
                    referrer_depth,
                    downline_depth,
                    max_depth: self.max_depth,
                });
            }
        }

        if !members::set_referred_by(conn, &new_uid, &referrer_uid).await? {
            return Err(LedgerError::ReferrerAlreadyAssigned(new_user_id));
        }

        let now = now_unix();
        referrals::insert_edge(
            conn,
            &referrals::EdgeRow {
                ancestor_id: referrer_uid.clone(),
                descendant_id: new_uid.clone(),
                level: 1,
                created_at: now,
            },
        )
        .await?;
        let max_level = i64::from(self.max_depth);
        let inherited = referrals::cascade_from_referrer(conn, &new_uid, &referrer_uid, max_level - 1, now).await?;
        let downline = referrals::attach_downline(conn, &new_uid, max_level, now).await?;

        info!(
            user_id = %new_user_id,
            referrer_id = %referrer_id,
            inherited,
            downline,
            "referral registered"
        );
        Ok(())
    }

    pub async fn ancestors_of(&self, user_id: UserId) -> LedgerResult<Vec<Ancestor>> {
        let mut conn = self.backend.acquire().await?;
        Self::ancestors_in(&mut conn, user_id).await
    }

    /// Upline nearest first; levels without an ancestor are absent
    pub(crate) async fn ancestors_in(conn: &mut SqliteConnection, user_id: UserId) -> LedgerResult<Vec<Ancestor>> {
        referrals::ancestors_of(conn, &user_id.to_string())
            .await?
            .into_iter()
            .map(|edge| {
                Ok(Ancestor {
                    ancestor_id: parse_field(&edge.ancestor_id, "ancestor id")?,
                    level: count(edge.level, "referral level")?,
                })
            })
            .collect()
    }

    /// Downline of `user_id` down to `max_level` (clamped to the depth cap),
    /// nested by direct referrer
    pub async fn descendants_of(&self, user_id: UserId, max_level: u32) -> LedgerResult<Vec<ReferralNode>> {
        let max_level = max_level.clamp(1, self.max_depth);
        let mut conn = self.backend.acquire().await?;
        let rows = referrals::downline(&mut conn, &user_id.to_string(), i64::from(max_level)).await?;

        let mut by_parent: HashMap<String, Vec<referrals::DownlineRow>> = HashMap::new();
        for row in rows {
            let parent = row.referred_by.clone().unwrap_or_default();
            by_parent.entry(parent).or_default().push(row);
        }
        let tree = build_subtree(&mut by_parent, &user_id.to_string())?;
        debug!(user_id = %user_id, max_level, size = tree.len(), "downline loaded");
        Ok(tree)
    }

    /// Referral counts and commission earned for levels `1..=max_depth`
    pub async fn level_summary(&self, user_id: UserId) -> LedgerResult<Vec<LevelSummary>> {
        let uid = user_id.to_string();
        let mut conn = self.backend.acquire().await?;
        let counts: HashMap<i64, i64> = referrals::count_by_level(&mut conn, &uid).await?.into_iter().collect();
        let totals: HashMap<i64, i64> = commissions::totals_by_level(&mut conn, &uid).await?.into_iter().collect();
        let mut percentages = HashMap::new();
        for row in commissions::list_levels(&mut conn).await? {
            percentages.insert(row.level, parse_field::<Decimal>(&row.percentage, "level percentage")?);
        }

        (1..=self.max_depth)
            .map(|level| {
                let key = i64::from(level);
                Ok(LevelSummary {
                    level,
                    referral_count: count(counts.get(&key).copied().unwrap_or(0), "referral count")?,
                    commission_total: from_minor(totals.get(&key).copied().unwrap_or(0)),
                    percentage: percentages.get(&key).copied(),
                })
            })
            .collect()
    }

    /// Member owning a referral code; case and surrounding space are ignored
    pub async fn resolve_referral_code(&self, code: &str) -> LedgerResult<UserId> {
        let mut conn = self.backend.acquire().await?;
        Self::resolve_referral_code_in(&mut conn, code).await
    }

    pub(crate) async fn resolve_referral_code_in(conn: &mut SqliteConnection, code: &str) -> LedgerResult<UserId> {
        let normalized = normalize_referral_code(code);
        let member = members::find_by_referral_code(conn, &normalized)
            .await?
            .ok_or_else(|| LedgerError::InvalidReferrer(format!("unknown referral code {}", normalized)))?;
        parse_field(&member.user_id, "member id")
    }
}

fn build_subtree(
    by_parent: &mut HashMap<String, Vec<referrals::DownlineRow>>,
    parent: &str,
) -> LedgerResult<Vec<ReferralNode>> {
    let Some(rows) = by_parent.remove(parent) else {
        return Ok(Vec::new());
    };
    rows.into_iter()
        .map(|row| {
            let children = build_subtree(by_parent, &row.user_id)?;
            Ok(ReferralNode {
                user_id: parse_field(&row.user_id, "member id")?,
                full_name: row.full_name,
                referral_code: row.referral_code,
                level: count(row.level, "referral level")?,
                joined_at: timestamp(row.created_at)?,
                children,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_storage::ledger::members::{insert_member, MemberRow};

    async fn graph(max_depth: u32, policy: DepthPolicy) -> ReferralGraph {
        let backend = SqliteBackend::open_in_memory().await.unwrap();
        let retry = RetryConfig {
            max_attempts: 3,
            backoff_ms: 1,
        };
        ReferralGraph::new(backend, max_depth, policy, retry)
    }

    async fn member(graph: &ReferralGraph, n: u32) -> UserId {
        let user_id = UserId::generate();
        let mut conn = graph.backend.acquire().await.unwrap();
        insert_member(
            &mut conn,
            &MemberRow {
                user_id: user_id.to_string(),
                full_name: format!("Member {}", n),
                phone: format!("90000000{:02}", n),
                referral_code: format!("REF1000{:02}", n),
                referred_by: None,
                created_at: i64::from(n),
            },
        )
        .await
        .unwrap();
        user_id
    }

    /// Chain m0 <- m1 <- ... <- m(len-1)
    async fn chain(graph: &ReferralGraph, len: u32) -> Vec<UserId> {
        let mut ids = Vec::new();
        for n in 0..len {
            let id = member(graph, n).await;
            if let Some(&parent) = ids.last() {
                graph.register_referral(id, parent).await.unwrap();
            }
            ids.push(id);
        }
        ids
    }

    #[tokio::test]
    async fn test_grandparent_edge() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let ids = chain(&graph, 3).await;
        let (a, b, c) = (ids[0], ids[1], ids[2]);

        let ancestors = graph.ancestors_of(c).await.unwrap();
        assert_eq!(
            ancestors,
            vec![
                Ancestor { ancestor_id: b, level: 1 },
                Ancestor { ancestor_id: a, level: 2 },
            ]
        );
        assert!(graph.ancestors_of(a).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_cycle_and_unknown_referrer() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let ids = chain(&graph, 2).await;

        assert!(matches!(
            graph.register_referral(ids[0], ids[0]).await,
            Err(LedgerError::InvalidReferrer(_))
        ));
        // a is b's referrer, so b cannot refer a
        assert!(matches!(
            graph.register_referral(ids[0], ids[1]).await,
            Err(LedgerError::InvalidReferrer(_))
        ));
        assert!(matches!(
            graph.register_referral(ids[1], UserId::generate()).await,
            Err(LedgerError::InvalidReferrer(_))
        ));
    }

    #[tokio::test]
    async fn test_cycle_beyond_depth_cap_is_refused() {
        let graph = graph(3, DepthPolicy::Truncate).await;
        let ids = chain(&graph, 5).await;

        // m4 is four levels below m0, past the edges kept for a cap of 3
        assert!(matches!(
            graph.register_referral(ids[0], ids[4]).await,
            Err(LedgerError::InvalidReferrer(_))
        ));
        assert!(graph.ancestors_of(ids[0]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reject_policy_counts_existing_downline() {
        let graph = graph(3, DepthPolicy::Reject).await;
        let upline = chain(&graph, 2).await;
        let x = member(&graph, 10).await;
        let y = member(&graph, 11).await;
        let z = member(&graph, 12).await;
        graph.register_referral(y, x).await.unwrap();
        graph.register_referral(z, y).await.unwrap();

        assert!(matches!(
            graph.register_referral(x, upline[1]).await,
            Err(LedgerError::MaxDepthExceeded {
                referrer_depth: 1,
                downline_depth: 2,
                max_depth: 3
            })
        ));
        assert_eq!(graph.ancestors_of(z).await.unwrap().len(), 2);

        graph.register_referral(x, upline[0]).await.unwrap();
        let ancestors = graph.ancestors_of(z).await.unwrap();
        assert_eq!(ancestors.len(), 3);
        assert_eq!(ancestors[2], Ancestor { ancestor_id: upline[0], level: 3 });
    }

    #[tokio::test]
    async fn test_referrer_assigned_once() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let a = member(&graph, 1).await;
        let b = member(&graph, 2).await;
        let c = member(&graph, 3).await;

        graph.register_referral(c, a).await.unwrap();
        assert!(matches!(
            graph.register_referral(c, b).await,
            Err(LedgerError::ReferrerAlreadyAssigned(id)) if id == c
        ));
    }

    #[tokio::test]
    async fn test_truncate_keeps_nearest_levels() {
        let graph = graph(3, DepthPolicy::Truncate).await;
        let ids = chain(&graph, 5).await;

        let ancestors = graph.ancestors_of(ids[4]).await.unwrap();
        let levels: Vec<u32> = ancestors.iter().map(|a| a.level).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        assert_eq!(ancestors[2].ancestor_id, ids[1]);
    }

    #[tokio::test]
    async fn test_reject_policy_refuses_deep_referrer() {
        let graph = graph(2, DepthPolicy::Reject).await;
        let ids = chain(&graph, 3).await;
        let newcomer = member(&graph, 9).await;

        assert!(matches!(
            graph.register_referral(newcomer, ids[2]).await,
            Err(LedgerError::MaxDepthExceeded { referrer_depth: 2, downline_depth: 0, max_depth: 2 })
        ));
        assert!(graph.ancestors_of(newcomer).await.unwrap().is_empty());
        graph.register_referral(newcomer, ids[1]).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_attach_carries_downline() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let a = member(&graph, 1).await;
        let b = member(&graph, 2).await;
        let c = member(&graph, 3).await;

        graph.register_referral(c, b).await.unwrap();
        graph.register_referral(b, a).await.unwrap();

        let ancestors = graph.ancestors_of(c).await.unwrap();
        assert_eq!(ancestors.len(), 2);
        assert_eq!(ancestors[1], Ancestor { ancestor_id: a, level: 2 });
    }

    #[tokio::test]
    async fn test_descendant_tree_and_summary() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let root = member(&graph, 1).await;
        let left = member(&graph, 2).await;
        let right = member(&graph, 3).await;
        let grandchild = member(&graph, 4).await;
        graph.register_referral(left, root).await.unwrap();
        graph.register_referral(right, root).await.unwrap();
        graph.register_referral(grandchild, left).await.unwrap();

        let tree = graph.descendants_of(root, 10).await.unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].user_id, left);
        assert_eq!(tree[0].children[0].user_id, grandchild);
        assert_eq!(tree[0].children[0].level, 2);
        assert_eq!(tree.iter().map(|n| 1 + n.descendant_count()).sum::<usize>(), 3);

        let shallow = graph.descendants_of(root, 1).await.unwrap();
        assert!(shallow.iter().all(|n| n.children.is_empty()));

        let summary = graph.level_summary(root).await.unwrap();
        assert_eq!(summary.len(), 10);
        assert_eq!(summary[0].referral_count, 2);
        assert_eq!(summary[1].referral_count, 1);
        assert_eq!(summary[2].referral_count, 0);
        assert_eq!(summary[0].commission_total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_resolve_referral_code() {
        let graph = graph(10, DepthPolicy::Truncate).await;
        let a = member(&graph, 7).await;
        assert_eq!(graph.resolve_referral_code("  ref100007 ").await.unwrap(), a);
        assert!(matches!(
            graph.resolve_referral_code("REF999999").await,
            Err(LedgerError::InvalidReferrer(_))
        ));
    }
}
