//! Signature verification module

pub mod capture_verify;

pub use capture_verify::{
    compute_capture_signature, verify_capture_signature, CaptureVerificationError,
};
