//! Core library for Varlock.
//!
//! Varlock stores environment-variable secrets per project and environment,
//! shares them with fine-grained roles, and authenticates headless CLI
//! clients through a device-code flow. This crate holds the domain logic
//! that does not depend on a database:
//!
//! - [`keyring`] — the active-key registry with TTL caching over an
//!   injectable [`keyring::KeyStore`]
//! - [`envelope`] — versioned envelope encryption
//!   (`v1:<keyId>:<base64(nonce || ciphertext || tag)>`) with legacy
//!   fallback and re-encryption for key rotation
//! - [`rotator`] — the bounded background queue that lazily re-encrypts
//!   stale secrets detected on read
//! - [`authz`] — pure project-role resolution and permission mapping
//! - [`device`] — device-code flow primitives (codes, TTLs, poll decisions)
//! - [`token`] — bearer-token generation, hashing, and prefix dispatch
//! - [`integrity`] — HMAC request signing with replay protection
//!
//! The HTTP API and PostgreSQL persistence live in `varlock-server`, which
//! plugs its own `KeyStore` and `RepairStore` implementations into this
//! crate.

pub mod authz;
pub mod device;
pub mod envelope;
pub mod error;
pub mod integrity;
pub mod keyring;
pub mod rotator;
pub mod token;

pub use error::{CryptoError, IntegrityError, KeyRegistryError, RotationError};
