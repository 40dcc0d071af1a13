//! Payment gateway capture confirmations
//!
//! The gateway itself is outside the ledger. What reaches us is a signed
//! confirmation that money was captured; it is verified before anything is
//! credited and consumed at most once.

use lib_crypto::{compute_capture_signature, verify_capture_signature};
use lib_storage::ledger::{captures, now_unix};
use lib_storage::{SqliteConnection, StorageError};
use lib_types::{Amount, UserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::convert::positive_minor;
use crate::errors::{LedgerError, LedgerResult};

/// Only currency the ledger accepts
pub const LEDGER_CURRENCY: &str = "INR";

/// Signed capture confirmation returned by the payment gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfirmation {
    pub order_id: String,
    pub payment_id: String,
    /// Hex HMAC-SHA256 over `order_id|payment_id`
    pub signature: String,
    pub amount: Amount,
    pub currency: String,
}

impl CaptureConfirmation {
    /// Build a confirmation signed with `secret`, as the gateway would
    pub fn signed(
        secret: &str,
        order_id: impl Into<String>,
        payment_id: impl Into<String>,
        amount: Amount,
    ) -> LedgerResult<Self> {
        let order_id = order_id.into();
        let payment_id = payment_id.into();
        let signature = compute_capture_signature(secret.as_bytes(), &order_id, &payment_id)?;
        Ok(Self {
            order_id,
            payment_id,
            signature,
            amount,
            currency: LEDGER_CURRENCY.to_string(),
        })
    }

    /// Check the signature and currency
    pub fn verify(&self, secret: Option<&str>) -> LedgerResult<()> {
        let secret = secret.ok_or_else(|| {
            LedgerError::SignatureVerificationFailed("no capture secret configured".into())
        })?;
        if !self.currency.eq_ignore_ascii_case(LEDGER_CURRENCY) {
            return Err(LedgerError::InvalidInput(format!("unsupported currency {}", self.currency)));
        }
        verify_capture_signature(secret.as_bytes(), &self.order_id, &self.payment_id, &self.signature).map_err(
            |e| {
                warn!(order_id = %self.order_id, payment_id = %self.payment_id, "rejected capture confirmation");
                LedgerError::from(e)
            },
        )
    }
}

/// Record the capture as used inside the caller's transaction.
///
/// A gateway payment id that was already applied fails with
/// `DuplicateSourcePayment`.
pub(crate) async fn consume_capture_in(
    conn: &mut SqliteConnection,
    capture: &CaptureConfirmation,
    user_id: UserId,
    purpose: &str,
) -> LedgerResult<()> {
    let amount = positive_minor(capture.amount, "capture amount")?;
    captures::insert_capture(
        conn,
        &capture.payment_id,
        &capture.order_id,
        &user_id.to_string(),
        purpose,
        amount,
        now_unix(),
    )
    .await
    .map_err(|e| match e {
        e if e.is_unique_on(captures::CAPTURE_UNIQUE) => {
            LedgerError::DuplicateSourcePayment(capture.payment_id.clone())
        }
        StorageError::ForeignKeyViolation(_) => LedgerError::not_found("member", user_id),
        other => other.into(),
    })
}
