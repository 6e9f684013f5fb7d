//! PostgreSQL-backed key store.
//!
//! Data keys live in the `encryption_keys` table wrapped (AES-256-GCM
//! sealed) under the master key from server configuration. At most one row
//! is `active`; retired keys stay resident so old envelopes remain
//! decryptable. The master key doubles as the legacy key for payloads
//! written before key versioning existed.
//!
//! Unwrapped material is only ever handed out as zeroize-on-drop
//! [`EncryptionKey`] values; the [`varlock_core::keyring::KeyRegistry`]
//! layered on top takes care of caching.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sqlx::PgPool;
use uuid::Uuid;

use async_trait::async_trait;
use varlock_core::envelope::{open, seal};
use varlock_core::error::KeyRegistryError;
use varlock_core::keyring::{ActiveKey, EncryptionKey, KeyStore};

use crate::error::ApiError;
use crate::models::EncryptionKeyRow;
use crate::repository;

/// Key store over the `encryption_keys` table.
pub struct PgKeyStore {
    pool: PgPool,
    master: EncryptionKey,
}

impl PgKeyStore {
    /// Create a store over the given pool with the configured master key.
    #[must_use]
    pub fn new(pool: PgPool, master: EncryptionKey) -> Self {
        Self { pool, master }
    }

    /// Generate a fresh data key, wrap it under the master key, and insert
    /// it as the active key (retiring the previous one). Returns the new
    /// key id. Existing secrets are not rewritten — read-repair and the
    /// scavenger converge them lazily.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] if wrapping or the insert fails.
    pub async fn roll(&self) -> Result<String, ApiError> {
        let key_id = Uuid::new_v4().to_string();
        let data_key = EncryptionKey::generate();
        let wrapped = seal(&self.master, data_key.as_bytes())
            .map_err(|e| ApiError::Crypto(e.to_string()))?;

        repository::roll_key(&self.pool, &key_id, &BASE64.encode(wrapped)).await?;

        tracing::info!(key_id = %key_id, "rolled active encryption key");
        Ok(key_id)
    }

    /// Unwrap a stored data-key row into key material.
    fn unwrap_row(&self, row: &EncryptionKeyRow) -> Result<EncryptionKey, KeyRegistryError> {
        let wrapped = BASE64
            .decode(&row.encrypted_key)
            .map_err(|e| KeyRegistryError::Unavailable {
                reason: format!("key row {} is not valid base64: {e}", row.id),
            })?;

        let material = open(&self.master, &wrapped).map_err(|e| KeyRegistryError::Unavailable {
            reason: format!("failed to unwrap key {}: {e}", row.id),
        })?;

        let bytes: [u8; 32] =
            material
                .as_slice()
                .try_into()
                .map_err(|_| KeyRegistryError::Unavailable {
                    reason: format!("key {} has invalid length", row.id),
                })?;

        Ok(EncryptionKey::from_bytes(bytes))
    }
}

#[async_trait]
impl KeyStore for PgKeyStore {
    async fn active_key(&self) -> Result<ActiveKey, KeyRegistryError> {
        let row = repository::get_active_key_row(&self.pool)
            .await
            .map_err(|e| KeyRegistryError::Unavailable {
                reason: e.to_string(),
            })?
            .ok_or(KeyRegistryError::NoActiveKey)?;

        let key = self.unwrap_row(&row)?;
        Ok(ActiveKey { id: row.id, key })
    }

    async fn key_material(&self, key_id: &str) -> Result<EncryptionKey, KeyRegistryError> {
        let row = repository::get_key_row(&self.pool, key_id)
            .await
            .map_err(|e| KeyRegistryError::Unavailable {
                reason: e.to_string(),
            })?
            .ok_or_else(|| KeyRegistryError::UnknownKey {
                key_id: key_id.to_owned(),
            })?;

        self.unwrap_row(&row)
    }

    fn legacy_key(&self) -> Option<EncryptionKey> {
        // Pre-envelope payloads were encrypted directly under the master key.
        Some(self.master.clone())
    }
}

impl std::fmt::Debug for PgKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgKeyStore").finish_non_exhaustive()
    }
}
