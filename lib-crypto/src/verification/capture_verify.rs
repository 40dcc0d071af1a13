//! Capture confirmation verification (HMAC-SHA256, hex encoded)

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Why a capture confirmation was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureVerificationError {
    #[error("Capture secret is empty")]
    EmptySecret,

    #[error("Signature is not valid hex")]
    MalformedSignature,

    #[error("Signature does not match order and payment ids")]
    Mismatch,
}

fn capture_mac(secret: &[u8], order_id: &str, payment_id: &str) -> Result<HmacSha256, CaptureVerificationError> {
    if secret.is_empty() {
        return Err(CaptureVerificationError::EmptySecret);
    }
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CaptureVerificationError::EmptySecret)?;
    mac.update(order_id.as_bytes());
    mac.update(b"|");
    mac.update(payment_id.as_bytes());
    Ok(mac)
}

/// Compute the lowercase hex signature the gateway is expected to send
pub fn compute_capture_signature(
    secret: &[u8],
    order_id: &str,
    payment_id: &str,
) -> Result<String, CaptureVerificationError> {
    let mac = capture_mac(secret, order_id, payment_id)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a gateway signature in constant time.
pub fn verify_capture_signature(
    secret: &[u8],
    order_id: &str,
    payment_id: &str,
    signature_hex: &str,
) -> Result<(), CaptureVerificationError> {
    let provided = hex::decode(signature_hex.trim())
        .map_err(|_| CaptureVerificationError::MalformedSignature)?;
    let mac = capture_mac(secret, order_id, payment_id)?;
    mac.verify_slice(&provided).map_err(|_| {
        debug!(order_id, payment_id, "capture signature mismatch");
        CaptureVerificationError::Mismatch
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test_capture_secret";

    #[test]
    fn test_signature_roundtrip() {
        let sig = compute_capture_signature(SECRET, "order_ABC", "pay_123").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify_capture_signature(SECRET, "order_ABC", "pay_123", &sig).is_ok());
    }

    #[test]
    fn test_uppercase_hex_accepted() {
        let sig = compute_capture_signature(SECRET, "order_ABC", "pay_123").unwrap();
        assert!(verify_capture_signature(SECRET, "order_ABC", "pay_123", &sig.to_uppercase()).is_ok());
    }

    #[test]
    fn test_swapped_ids_rejected() {
        let sig = compute_capture_signature(SECRET, "order_ABC", "pay_123").unwrap();
        assert_eq!(
            verify_capture_signature(SECRET, "pay_123", "order_ABC", &sig),
            Err(CaptureVerificationError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let sig = compute_capture_signature(b"other", "order_ABC", "pay_123").unwrap();
        assert_eq!(
            verify_capture_signature(SECRET, "order_ABC", "pay_123", &sig),
            Err(CaptureVerificationError::Mismatch)
        );
    }

    #[test]
    fn test_malformed_and_empty_secret() {
        assert_eq!(
            verify_capture_signature(SECRET, "o", "p", "not-hex"),
            Err(CaptureVerificationError::MalformedSignature)
        );
        assert_eq!(
            compute_capture_signature(b"", "o", "p"),
            Err(CaptureVerificationError::EmptySecret)
        );
    }
}
