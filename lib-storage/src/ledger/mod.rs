//! Row structs and row operations for every ledger table
//!
//! All statements are static strings with bound parameters. None of these
//! functions commit: they run on whatever connection or transaction the
//! caller hands in.

pub mod activity;
pub mod captures;
pub mod commissions;
pub mod members;
pub mod payments;
pub mod plans;
pub mod rates;
pub mod referrals;
pub mod subscriptions;
pub mod wallets;

/// Current time as unix seconds
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
