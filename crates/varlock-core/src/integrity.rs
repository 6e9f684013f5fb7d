//! HMAC request signing and replay protection for mutating calls.
//!
//! Callers sign `"{timestamp}.{payload}"` with HMAC-SHA256 and send the
//! epoch-milliseconds timestamp and hex digest as headers. Verification
//! rejects anything outside a ±30-second window *before* looking at the
//! signature, so a captured request cannot be replayed later even with a
//! valid digest. Digest comparison is constant-time.
//!
//! Request bodies whose canonical form cannot be captured client-side
//! (multipart encodings) are signed over the empty payload — a documented,
//! narrower trust boundary for those content types.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::IntegrityError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signer's epoch-milliseconds timestamp.
pub const TIMESTAMP_HEADER: &str = "x-timestamp";

/// Header carrying the hex HMAC-SHA256 digest.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Maximum accepted clock skew between signer and verifier, in
/// milliseconds. Requests older (or newer) than this are rejected
/// regardless of signature validity.
pub const REPLAY_WINDOW_MS: i64 = 30_000;

/// Sign a payload: hex HMAC-SHA256 of `"{timestamp_ms}.{payload}"`.
#[must_use]
pub fn sign(secret: &[u8], timestamp_ms: i64, payload: &[u8]) -> String {
    let mut mac = hmac_for(secret);
    mac.update(timestamp_ms.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signed request.
///
/// The replay window is checked first: a stale timestamp fails with
/// [`IntegrityError::Replay`] even when the signature is valid. The digest
/// comparison is constant-time.
///
/// # Errors
///
/// - [`IntegrityError::Replay`] if `|now - timestamp| > 30s`.
/// - [`IntegrityError::BadSignature`] on digest mismatch.
pub fn verify(
    secret: &[u8],
    timestamp_ms: i64,
    payload: &[u8],
    signature_hex: &str,
    now_ms: i64,
) -> Result<(), IntegrityError> {
    let skew_ms = now_ms.saturating_sub(timestamp_ms);
    if skew_ms.abs() > REPLAY_WINDOW_MS {
        return Err(IntegrityError::Replay { skew_ms });
    }

    let expected = sign(secret, timestamp_ms, payload);
    if bool::from(expected.as_bytes().ct_eq(signature_hex.as_bytes())) {
        Ok(())
    } else {
        Err(IntegrityError::BadSignature)
    }
}

fn hmac_for(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so new_from_slice cannot fail here.
    HmacSha256::new_from_slice(secret).unwrap_or_else(|_| HmacSha256::new(&Default::default()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"perimeter-secret";

    #[test]
    fn sign_and_verify_roundtrip() {
        let now = 1_700_000_000_000;
        let sig = sign(SECRET, now, b"{\"name\":\"api\"}");
        assert!(verify(SECRET, now, b"{\"name\":\"api\"}", &sig, now).is_ok());
    }

    #[test]
    fn signature_binds_the_payload() {
        let now = 1_700_000_000_000;
        let sig = sign(SECRET, now, b"payload-a");
        assert_eq!(
            verify(SECRET, now, b"payload-b", &sig, now),
            Err(IntegrityError::BadSignature)
        );
    }

    #[test]
    fn signature_binds_the_timestamp() {
        let now = 1_700_000_000_000;
        let sig = sign(SECRET, now, b"payload");
        assert_eq!(
            verify(SECRET, now + 1, b"payload", &sig, now),
            Err(IntegrityError::BadSignature)
        );
    }

    #[test]
    fn signature_binds_the_secret() {
        let now = 1_700_000_000_000;
        let sig = sign(b"other-secret", now, b"payload");
        assert_eq!(
            verify(SECRET, now, b"payload", &sig, now),
            Err(IntegrityError::BadSignature)
        );
    }

    #[test]
    fn valid_signature_29s_old_is_accepted() {
        let signed_at = 1_700_000_000_000;
        let sig = sign(SECRET, signed_at, b"payload");
        let now = signed_at + 29_000;
        assert!(verify(SECRET, signed_at, b"payload", &sig, now).is_ok());
    }

    #[test]
    fn valid_signature_31s_old_is_replay_rejected() {
        let signed_at = 1_700_000_000_000;
        let sig = sign(SECRET, signed_at, b"payload");
        let now = signed_at + 31_000;
        assert!(matches!(
            verify(SECRET, signed_at, b"payload", &sig, now),
            Err(IntegrityError::Replay { skew_ms: 31_000 })
        ));
    }

    #[test]
    fn future_timestamps_are_rejected_too() {
        let now = 1_700_000_000_000;
        let signed_at = now + 31_000;
        let sig = sign(SECRET, signed_at, b"payload");
        assert!(matches!(
            verify(SECRET, signed_at, b"payload", &sig, now),
            Err(IntegrityError::Replay { .. })
        ));
    }

    #[test]
    fn empty_payload_signature_verifies() {
        // The multipart fallback signs the empty payload.
        let now = 1_700_000_000_000;
        let sig = sign(SECRET, now, b"");
        assert!(verify(SECRET, now, b"", &sig, now).is_ok());
    }
}
