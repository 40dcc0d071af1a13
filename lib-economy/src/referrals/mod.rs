//! Multi-level referrals
//!
//! The graph keeps one edge per (ancestor, descendant) pair with its level;
//! the commission engine walks those edges when a payment qualifies.

pub mod commission;
pub mod graph;

pub use commission::{commission_amount, CommissionEngine, CommissionRecord, LevelPercentage};
pub use graph::{normalize_referral_code, Ancestor, LevelSummary, ReferralGraph, ReferralNode};
