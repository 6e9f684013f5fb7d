//! Bearer-token primitives.
//!
//! Tokens are random high-entropy strings with a type-identifying prefix,
//! persisted only as SHA-256 hashes. The prefix routes validation to one of
//! two disjoint stores: personal tokens (user identity, full role
//! resolution) and service tokens (project identity, no user).
//!
//! # Security model
//!
//! - 256 bits of OS CSPRNG randomness per token, hex-encoded.
//! - Stored as `SHA-256(token)` — the plaintext is returned once at
//!   issuance and never again.
//! - Re-authenticating the same named device *replaces* its previous token
//!   (upsert on `(subject, name)`), it never accumulates rows.

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use sha2::{Digest, Sha256};

/// Prefix for personal access tokens (1-hour TTL).
pub const ACCESS_TOKEN_PREFIX: &str = "vlk_at_";

/// Prefix for personal refresh tokens (30-day TTL).
pub const REFRESH_TOKEN_PREFIX: &str = "vlk_rt_";

/// Prefix for project-scoped service tokens.
pub const SERVICE_TOKEN_PREFIX: &str = "vlk_st_";

/// Access-token lifetime, in seconds.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Refresh-token lifetime, in seconds.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

/// What a token is for, as declared by its prefix at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    Service,
}

impl TokenKind {
    /// The wire prefix for this kind.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Access => ACCESS_TOKEN_PREFIX,
            Self::Refresh => REFRESH_TOKEN_PREFIX,
            Self::Service => SERVICE_TOKEN_PREFIX,
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access => write!(f, "access"),
            Self::Refresh => write!(f, "refresh"),
            Self::Service => write!(f, "service"),
        }
    }
}

/// Which store a presented bearer token is validated against.
///
/// Service tokens bypass user-role resolution entirely; anything else —
/// including prefixless tokens from before prefixes existed — goes to the
/// personal store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStore {
    Personal,
    Service,
}

/// Route a presented bearer token to its store by prefix.
#[must_use]
pub fn lookup_store(token: &str) -> LookupStore {
    if token.starts_with(SERVICE_TOKEN_PREFIX) {
        LookupStore::Service
    } else {
        LookupStore::Personal
    }
}

/// Generate a fresh token of the given kind.
///
/// `<prefix><64 hex chars>` — 256 bits of OS CSPRNG randomness.
#[must_use]
pub fn generate_token(kind: TokenKind) -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", kind.prefix(), hex::encode(bytes))
}

/// Hash a plaintext token with SHA-256, returning the hex-encoded digest.
///
/// One-way: the plaintext cannot be recovered from storage.
#[must_use]
pub fn hash_token(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Short display form for token listings (prefix + first hex chars).
#[must_use]
pub fn display_prefix(token: &str) -> String {
    let end = token.len().min(12);
    format!("{}...", &token[..end])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_carry_their_prefix() {
        assert!(generate_token(TokenKind::Access).starts_with("vlk_at_"));
        assert!(generate_token(TokenKind::Refresh).starts_with("vlk_rt_"));
        assert!(generate_token(TokenKind::Service).starts_with("vlk_st_"));
    }

    #[test]
    fn generated_tokens_are_unique_and_high_entropy() {
        let a = generate_token(TokenKind::Access);
        let b = generate_token(TokenKind::Access);
        assert_ne!(a, b);
        assert_eq!(a.len(), ACCESS_TOKEN_PREFIX.len() + 64);
    }

    #[test]
    fn hash_is_deterministic_and_one_way_shaped() {
        let token = "vlk_at_deadbeef";
        let h1 = hash_token(token);
        let h2 = hash_token(token);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, hash_token("vlk_at_deadbeee"));
    }

    #[test]
    fn prefix_routes_to_store() {
        assert_eq!(
            lookup_store(&generate_token(TokenKind::Service)),
            LookupStore::Service
        );
        assert_eq!(
            lookup_store(&generate_token(TokenKind::Access)),
            LookupStore::Personal
        );
        assert_eq!(
            lookup_store(&generate_token(TokenKind::Refresh)),
            LookupStore::Personal
        );
        // Prefixless tokens fall through to the personal store.
        assert_eq!(lookup_store("some-opaque-token"), LookupStore::Personal);
    }

    #[test]
    fn display_prefix_truncates() {
        let token = generate_token(TokenKind::Access);
        let shown = display_prefix(&token);
        assert!(shown.ends_with("..."));
        assert!(shown.len() < token.len());
    }
}
