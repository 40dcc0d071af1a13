//! Gold Savings Ledger
//!
//! Back-office core of a gold savings product. Members pay a fixed monthly
//! installment into a plan; every installment buys gold at the current rate,
//! the last one adds a completion bonus, and each one pays a commission to
//! the payer's referral upline.
//!
//! ENGINES
//!
//! - Rate provider: latest published gold rate, with a configured fallback
//! - Subscription ledger: enrollment, installment schedule, gold accrual, bonus
//! - Referral graph: ancestor edges per member, up to the configured depth
//! - Commission engine: level percentages applied per qualifying payment
//! - Wallet store: savings, referral and gold balances; top-ups and withdrawals
//!
//! A payment and everything it causes is committed in one SQLite transaction.

pub mod config;
pub mod errors;
pub mod gateway;
pub mod ledger;
pub mod plans;
pub mod pricing;
pub mod referrals;
pub mod registry;
pub mod retry;
pub mod subscriptions;
pub mod wallets;

mod convert;

// Re-export main types
pub use config::{
    DepthPolicy, GatewayConfig, LedgerConfig, LevelSeed, RateConfig, ReferralConfig, RetryConfig, StoreConfig,
    CAPTURE_SECRET_ENV,
};
pub use errors::{LedgerError, LedgerResult};
pub use gateway::{CaptureConfirmation, LEDGER_CURRENCY};
pub use ledger::{SavingsLedger, SeedSummary};
pub use plans::{NewPlan, Plan, PlanCatalog};
pub use pricing::{GoldRate, RateProvider, RateSource, StaticRateProvider, StoredRateProvider};
pub use referrals::{
    commission_amount, Ancestor, CommissionEngine, CommissionRecord, LevelPercentage, LevelSummary, ReferralGraph,
    ReferralNode,
};
pub use registry::{InvestmentAccount, Member, MemberRegistry, NewMember, Registration};
pub use retry::with_conflict_retry;
pub use subscriptions::{GoldHolding, Payment, PaymentReceipt, ScheduleStatus, Subscription, SubscriptionLedger};
pub use wallets::{LedgerTransaction, Wallet, WalletStore, MIN_TOP_UP};

pub use lib_types::{
    AccountId, Amount, Decimal, HoldingKind, Milligrams, PaymentId, PaymentKind, PaymentStatus, Percentage, PlanId,
    SubscriptionId, SubscriptionStatus, TransactionKind, UserId, WalletField, WithdrawalSource,
};
