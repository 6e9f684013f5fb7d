//! Shared application state for the Varlock server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the connection pool, the key registry
//! and envelope cipher, the read-repair scheduling handle, and the loaded
//! configuration.

use std::sync::Arc;

use sqlx::PgPool;

use varlock_core::envelope::EnvelopeCipher;
use varlock_core::keyring::KeyRegistry;
use varlock_core::rotator::RotatorHandle;

use crate::config::ServerConfig;
use crate::keystore::PgKeyStore;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// PostgreSQL connection pool.
    pub pool: PgPool,
    /// TTL-cached active-key registry.
    pub registry: Arc<KeyRegistry>,
    /// Envelope cipher over the registry.
    pub cipher: Arc<EnvelopeCipher>,
    /// Read-repair scheduling handle (non-blocking).
    pub rotator: RotatorHandle,
    /// The Postgres key store, kept for key administration (roll).
    pub keystore: Arc<PgKeyStore>,
    /// Loaded server configuration.
    pub config: Arc<ServerConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
