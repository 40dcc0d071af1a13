//! Gold savings ledger primitives.
//! Stable, storage-neutral, behavior-free.
//!
//! Rule: identifiers are typed, money is decimal.

pub mod primitives;
pub mod savings;
pub mod errors;

pub use primitives::{
    from_minor_units, gold_milligrams, round_money, to_minor_units, AccountId, Amount,
    Milligrams, PaymentId, Percentage, PlanId, SubscriptionId, UserId, GOLD_SCALE, MONEY_SCALE,
};
pub use savings::{
    HoldingKind, PaymentKind, PaymentStatus, SubscriptionStatus, TransactionKind, WalletField,
    WithdrawalSource, DEFAULT_MAX_REFERRAL_DEPTH, MAX_ACCOUNTS_PER_USER,
};
pub use errors::ParseEnumError;

pub use rust_decimal::Decimal;
