//! Error types for `varlock-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material or plaintext — only
//! key identifiers and operation descriptions.

/// Errors from the key registry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyRegistryError {
    /// No active encryption key is configured in the backing store.
    ///
    /// Fatal on the encrypt path. The decrypt path never needs the active
    /// key (only the key referenced by the ciphertext), so readers must not
    /// propagate this.
    #[error("no active encryption key configured")]
    NoActiveKey,

    /// The key id referenced by a ciphertext does not exist in the store.
    #[error("unknown encryption key: {key_id}")]
    UnknownKey { key_id: String },

    /// The backing key store failed (connectivity, malformed key row, ...).
    #[error("key store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors from envelope encryption and decryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or
    /// tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// The stored value is not a valid envelope (bad base64, missing
    /// sections, payload shorter than nonce + tag).
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    /// The envelope carries a version tag this build does not understand.
    /// Unknown versions are rejected explicitly rather than misread as
    /// legacy payloads.
    #[error("unsupported envelope version: {version}")]
    UnsupportedVersion { version: String },

    /// A legacy (unversioned) payload was found but no legacy key is
    /// configured to decrypt it.
    #[error("legacy payload found but no legacy key is configured")]
    NoLegacyKey,

    /// Key material could not be resolved for this operation.
    #[error("key registry error: {0}")]
    Key(#[from] KeyRegistryError),
}

/// Errors from the read-repair rotator and its persistence sink.
#[derive(Debug, thiserror::Error)]
pub enum RotationError {
    /// Re-encryption of the stale value failed.
    #[error("rotation crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The privileged persistence path failed.
    #[error("rotation store error: {reason}")]
    Store { reason: String },
}

/// Errors from request-integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    /// A required signing header was absent.
    #[error("missing required header: {name}")]
    MissingHeader { name: &'static str },

    /// The `X-Timestamp` header was not a valid epoch-milliseconds integer.
    #[error("malformed timestamp header")]
    MalformedTimestamp,

    /// The timestamp is outside the replay window. Rejected regardless of
    /// whether the signature itself is valid.
    #[error("request timestamp outside replay window (skew {skew_ms}ms)")]
    Replay { skew_ms: i64 },

    /// The signature did not match the payload.
    #[error("request signature mismatch")]
    BadSignature,
}
