//! Gold savings ledger cryptography
//!
//! The payment gateway signs each capture with HMAC-SHA256 over
//! `order_id|payment_id` using a secret shared with the ledger. Nothing may be
//! marked completed until that signature checks out.

pub mod verification;

pub use verification::{
    compute_capture_signature, verify_capture_signature, CaptureVerificationError,
};
