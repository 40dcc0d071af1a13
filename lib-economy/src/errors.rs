//! Ledger Errors

use lib_crypto::CaptureVerificationError;
use lib_storage::StorageError;
use lib_types::{PlanId, SubscriptionId, SubscriptionStatus, UserId, WalletField};
use thiserror::Error;

/// Error during ledger operations
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("No gold rate has been published")]
    NoRateAvailable,

    #[error("User {user_id} already has an active subscription")]
    AlreadyEnrolled { user_id: UserId },

    #[error("Subscription {subscription_id} has paid all {payment_months} installments")]
    ScheduleComplete {
        subscription_id: SubscriptionId,
        payment_months: u32,
    },

    #[error("Invalid referrer: {0}")]
    InvalidReferrer(String),

    #[error("Referrer sits at depth {referrer_depth} and the downline is {downline_depth} deep, cap is {max_depth}")]
    MaxDepthExceeded {
        referrer_depth: u32,
        downline_depth: u32,
        max_depth: u32,
    },

    #[error("Insufficient {field}: have {available}, need {requested}")]
    InsufficientBalance {
        field: WalletField,
        available: String,
        requested: String,
    },

    #[error("Source payment already processed: {0}")]
    DuplicateSourcePayment(String),

    #[error("Capture signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Write conflict: {0}")]
    PersistenceConflict(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Plan {0} is referenced by an active subscription")]
    PlanInUse(PlanId),

    #[error("Plan {0} is not open for enrollment")]
    PlanInactive(PlanId),

    #[error("Subscription {subscription_id} is {status}")]
    SubscriptionNotActive {
        subscription_id: SubscriptionId,
        status: SubscriptionStatus,
    },

    #[error("User {0} already has a referrer")]
    ReferrerAlreadyAssigned(UserId),

    #[error("User {user_id} already has {limit} investment accounts")]
    AccountLimitReached { user_id: UserId, limit: usize },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Stored value that failed to decode into a domain record
    pub(crate) fn corrupt(what: &str, detail: impl std::fmt::Display) -> Self {
        LedgerError::Storage(format!("corrupt {}: {}", what, detail))
    }

    /// Whether the operation may succeed if the transaction is replayed
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::PersistenceConflict(_))
    }
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Busy(msg) | StorageError::UniqueViolation(msg) => {
                LedgerError::PersistenceConflict(msg)
            }
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

impl From<CaptureVerificationError> for LedgerError {
    fn from(err: CaptureVerificationError) -> Self {
        LedgerError::SignatureVerificationFailed(err.to_string())
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
