//! Versioned envelope encryption for secret values.
//!
//! Every secret value at rest is either a versioned envelope
//! `v1:<keyId>:<base64(nonce || ciphertext || tag)>` or a legacy payload
//! (bare base64, encrypted under the well-known legacy key before key
//! versioning existed). Plaintext never touches storage.
//!
//! # Security model
//!
//! - AES-256-GCM with a fresh 96-bit nonce from `OsRng` on every encrypt —
//!   nonces never repeat for a given key.
//! - The 128-bit GCM tag authenticates the payload; any tampering fails
//!   decryption.
//! - The key id travels inside the envelope so old ciphertexts stay
//!   decryptable after the active key rolls forward.
//! - Unknown version tags (`v2:` and beyond) are rejected explicitly, never
//!   misread as legacy payloads.

use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::CryptoError;
use crate::keyring::{EncryptionKey, KeyRegistry};

/// Envelope version tag written by this build.
const VERSION_TAG: &str = "v1";

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// Minimum sealed payload length: 12-byte nonce + 16-byte GCM tag.
const MIN_SEALED_LEN: usize = NONCE_LEN + 16;

/// A parsed secret value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// A `v1:<keyId>:<payload>` envelope.
    Versioned { key_id: String, payload: Vec<u8> },
    /// A pre-versioning payload, decryptable only with the legacy key.
    Legacy(Vec<u8>),
}

/// Parse a stored value into an [`Envelope`].
///
/// # Errors
///
/// - [`CryptoError::UnsupportedVersion`] for `v<n>:` tags other than `v1`.
/// - [`CryptoError::MalformedEnvelope`] for truncated envelopes or invalid
///   base64 in either format.
pub fn parse(stored: &str) -> Result<Envelope, CryptoError> {
    if let Some(rest) = stored.strip_prefix("v1:") {
        let (key_id, payload_b64) =
            rest.split_once(':')
                .ok_or_else(|| CryptoError::MalformedEnvelope {
                    reason: "expected v1:<keyId>:<payload>".to_owned(),
                })?;
        if key_id.is_empty() {
            return Err(CryptoError::MalformedEnvelope {
                reason: "empty key id".to_owned(),
            });
        }
        let payload = decode_payload(payload_b64)?;
        return Ok(Envelope::Versioned {
            key_id: key_id.to_owned(),
            payload,
        });
    }

    // Reject foreign version tags instead of treating them as legacy data.
    if let Some(version) = version_tag(stored) {
        return Err(CryptoError::UnsupportedVersion {
            version: version.to_owned(),
        });
    }

    Ok(Envelope::Legacy(decode_payload(stored)?))
}

/// The key id embedded in a stored value, if it is a `v1` envelope.
#[must_use]
pub fn embedded_key_id(stored: &str) -> Option<&str> {
    stored
        .strip_prefix("v1:")
        .and_then(|rest| rest.split_once(':'))
        .map(|(key_id, _)| key_id)
}

/// Whether a stored value needs re-encryption under the given active key.
///
/// Legacy payloads and envelopes under a non-active key are stale. Envelopes
/// with an unknown version tag are *not* stale: this build cannot decrypt
/// them, so read-repair must never attempt to rewrite them.
#[must_use]
pub fn is_stale(stored: &str, active_key_id: &str) -> bool {
    match embedded_key_id(stored) {
        Some(key_id) => key_id != active_key_id,
        None => version_tag(stored).is_none(),
    }
}

/// Extract a leading `v<digits>` tag, if the value carries one.
fn version_tag(stored: &str) -> Option<&str> {
    let (tag, _) = stored.split_once(':')?;
    let digits = tag.strip_prefix('v')?;
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        Some(tag)
    } else {
        None
    }
}

fn decode_payload(payload_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let payload = BASE64
        .decode(payload_b64)
        .map_err(|e| CryptoError::MalformedEnvelope {
            reason: format!("invalid base64 payload: {e}"),
        })?;
    if payload.len() < MIN_SEALED_LEN {
        return Err(CryptoError::MalformedEnvelope {
            reason: format!(
                "payload too short: expected at least {MIN_SEALED_LEN} bytes, got {}",
                payload.len()
            ),
        });
    }
    Ok(payload)
}

/// Encrypt plaintext under the given key with a fresh random nonce.
///
/// Returns `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut combined = Vec::with_capacity(NONCE_LEN.saturating_add(ciphertext.len()));
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Decrypt a payload produced by [`seal`].
///
/// # Errors
///
/// Returns [`CryptoError::Decryption`] if authentication fails (wrong key,
/// corrupted data, or tampered tag).
pub fn open(key: &EncryptionKey, combined: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if combined.len() < MIN_SEALED_LEN {
        return Err(CryptoError::MalformedEnvelope {
            reason: format!(
                "payload too short: expected at least {MIN_SEALED_LEN} bytes, got {}",
                combined.len()
            ),
        });
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

/// Envelope cipher over a [`KeyRegistry`].
///
/// Encrypts under the active key, decrypts with whichever key a value
/// references, and re-encrypts stale values for rotation. Holds no mutable
/// state of its own — safe to share behind an `Arc`.
pub struct EnvelopeCipher {
    registry: Arc<KeyRegistry>,
}

impl EnvelopeCipher {
    /// Create a cipher over the given registry.
    #[must_use]
    pub fn new(registry: Arc<KeyRegistry>) -> Self {
        Self { registry }
    }

    /// The registry backing this cipher.
    #[must_use]
    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    /// Encrypt a plaintext secret value under the active key.
    ///
    /// Returns `v1:<keyId>:<base64(nonce || ciphertext || tag)>`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Key`] wrapping
    /// [`NoActiveKey`](crate::error::KeyRegistryError::NoActiveKey) when no
    /// active key is configured — fatal for writers.
    pub async fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let active = self.registry.active_key().await?;
        let sealed = seal(&active.key, plaintext.as_bytes())?;
        Ok(format!("{VERSION_TAG}:{}:{}", active.id, BASE64.encode(sealed)))
    }

    /// Decrypt a stored value, in either envelope or legacy format.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] on malformed input, unknown version tags,
    /// unresolvable keys, or tag mismatch. Read-path callers log the error
    /// and pass the stored string through unchanged instead of failing the
    /// request — that policy belongs to the caller, not this function.
    pub async fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let plaintext = match parse(stored)? {
            Envelope::Versioned { key_id, payload } => {
                let key = self.registry.key_material(&key_id).await?;
                open(&key, &payload)?
            }
            Envelope::Legacy(payload) => {
                let key = self.registry.legacy_key().ok_or(CryptoError::NoLegacyKey)?;
                open(&key, &payload)?
            }
        };

        String::from_utf8(plaintext).map_err(|e| CryptoError::Decryption {
            reason: format!("decrypted value is not valid UTF-8: {e}"),
        })
    }

    /// Re-encrypt a stored value under the current active key.
    ///
    /// Decrypts with the embedded (or legacy) key, then encrypts fresh.
    /// Pure with respect to storage — the caller persists the result.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if either the decrypt or the encrypt fails.
    pub async fn re_encrypt(&self, stored: &str) -> Result<(String, String), CryptoError> {
        let plaintext = self.decrypt(stored).await?;
        let new_value = self.encrypt(&plaintext).await?;
        let new_key_id = embedded_key_id(&new_value)
            .map(str::to_owned)
            .ok_or_else(|| CryptoError::MalformedEnvelope {
                reason: "freshly encrypted value is not a v1 envelope".to_owned(),
            })?;
        Ok((new_value, new_key_id))
    }
}

impl fmt::Debug for EnvelopeCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvelopeCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::keyring::StaticKeyStore;

    fn cipher_with_keys(active: &str, keys: &[&str]) -> (EnvelopeCipher, Arc<StaticKeyStore>) {
        let store = Arc::new(StaticKeyStore::new());
        for id in keys {
            store.insert_key(id, EncryptionKey::generate());
        }
        store.set_active(active);
        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(&store) as Arc<dyn crate::keyring::KeyStore>,
            Duration::ZERO,
        ));
        (EnvelopeCipher::new(registry), store)
    }

    #[tokio::test]
    async fn encrypt_decrypt_roundtrip() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("sk_live_123").await.unwrap();
        assert!(stored.starts_with("v1:k1:"));
        assert_eq!(cipher.decrypt(&stored).await.unwrap(), "sk_live_123");
    }

    #[tokio::test]
    async fn two_encryptions_differ() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let a = cipher.encrypt("same").await.unwrap();
        let b = cipher.encrypt("same").await.unwrap();
        // Fresh nonce per call.
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn empty_plaintext_roundtrips() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("").await.unwrap();
        assert_eq!(cipher.decrypt(&stored).await.unwrap(), "");
    }

    #[tokio::test]
    async fn decrypt_uses_embedded_key_not_active() {
        let (cipher, store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("value").await.unwrap();

        // Roll to k2; the old envelope still references k1 and must decrypt.
        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");
        assert_eq!(cipher.decrypt(&stored).await.unwrap(), "value");
    }

    #[tokio::test]
    async fn decrypt_works_with_no_active_key() {
        let (cipher, store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("value").await.unwrap();

        store.clear_active();
        assert_eq!(cipher.decrypt(&stored).await.unwrap(), "value");
        assert!(matches!(
            cipher.encrypt("new").await,
            Err(CryptoError::Key(_))
        ));
    }

    #[tokio::test]
    async fn legacy_payload_decrypts_with_legacy_key() {
        let (cipher, store) = cipher_with_keys("k1", &["k1"]);
        let legacy_key = EncryptionKey::generate();
        store.set_legacy(legacy_key.clone());

        let sealed = seal(&legacy_key, b"old secret").unwrap();
        let stored = BASE64.encode(sealed);
        assert_eq!(cipher.decrypt(&stored).await.unwrap(), "old secret");
    }

    #[tokio::test]
    async fn legacy_payload_without_legacy_key_fails() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let sealed = seal(&EncryptionKey::generate(), b"old").unwrap();
        let stored = BASE64.encode(sealed);
        assert!(matches!(
            cipher.decrypt(&stored).await,
            Err(CryptoError::NoLegacyKey)
        ));
    }

    #[tokio::test]
    async fn tampered_envelope_fails() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("value").await.unwrap();

        // Corrupt the payload while keeping valid base64.
        let (prefix, payload_b64) = stored.rsplit_once(':').unwrap();
        let mut payload = BASE64.decode(payload_b64).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;
        let tampered = format!("{prefix}:{}", BASE64.encode(payload));

        assert!(matches!(
            cipher.decrypt(&tampered).await,
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_version_is_rejected_explicitly() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let err = cipher.decrypt("v2:k1:AAAA").await.unwrap_err();
        assert!(matches!(
            err,
            CryptoError::UnsupportedVersion { version } if version == "v2"
        ));
    }

    #[tokio::test]
    async fn unknown_key_id_fails() {
        let (cipher, _store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("value").await.unwrap();
        let swapped = stored.replacen("v1:k1:", "v1:missing:", 1);
        assert!(matches!(
            cipher.decrypt(&swapped).await,
            Err(CryptoError::Key(_))
        ));
    }

    #[tokio::test]
    async fn re_encrypt_moves_to_active_key_and_preserves_meaning() {
        let (cipher, store) = cipher_with_keys("k1", &["k1"]);
        let stored = cipher.encrypt("sk_live_123").await.unwrap();

        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");

        let (rotated, new_key_id) = cipher.re_encrypt(&stored).await.unwrap();
        assert_eq!(new_key_id, "k2");
        assert!(rotated.starts_with("v1:k2:"));
        assert_eq!(cipher.decrypt(&rotated).await.unwrap(), "sk_live_123");
    }

    #[tokio::test]
    async fn re_encrypt_upgrades_legacy_payloads() {
        let (cipher, store) = cipher_with_keys("k1", &["k1"]);
        let legacy_key = EncryptionKey::generate();
        store.set_legacy(legacy_key.clone());

        let stored = BASE64.encode(seal(&legacy_key, b"old secret").unwrap());
        let (rotated, new_key_id) = cipher.re_encrypt(&stored).await.unwrap();
        assert_eq!(new_key_id, "k1");
        assert!(rotated.starts_with("v1:k1:"));
        assert_eq!(cipher.decrypt(&rotated).await.unwrap(), "old secret");
    }

    #[test]
    fn parse_rejects_malformed_envelopes() {
        assert!(matches!(
            parse("v1:missing-payload"),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            parse("v1::AAAA"),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
        assert!(matches!(
            parse("not base64 at all!!!"),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
        // Valid base64 but shorter than nonce + tag.
        assert!(matches!(
            parse("AAAA"),
            Err(CryptoError::MalformedEnvelope { .. })
        ));
    }

    #[test]
    fn staleness_follows_embedded_key() {
        assert!(is_stale("bGVnYWN5", "k1"), "legacy payloads are stale");
        assert!(is_stale("v1:k1:AAAA", "k2"));
        assert!(!is_stale("v1:k2:AAAA", "k2"));
        // Unknown versions are never rewritten by read-repair.
        assert!(!is_stale("v2:k1:AAAA", "k2"));
    }

    #[test]
    fn embedded_key_id_extraction() {
        assert_eq!(embedded_key_id("v1:k9:AAAA"), Some("k9"));
        assert_eq!(embedded_key_id("bGVnYWN5"), None);
    }
}
