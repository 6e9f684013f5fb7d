//! Key registry for Varlock.
//!
//! Data keys live in an external key store (wrapped under a master key the
//! store controls); this crate only ever sees unwrapped 256-bit material.
//! The [`KeyRegistry`] fronts the store with a TTL cache on the active key
//! so the hot encrypt path does not hammer the backing store, plus an
//! id-keyed material cache for the decrypt path.
//!
//! # Security model
//!
//! - Key material is held in [`EncryptionKey`] newtypes that zeroize on drop
//!   and redact their bytes from `Debug` output.
//! - The registry never persists anything — caches are process-local.
//! - Callers on the decrypt path only need the key referenced by a
//!   ciphertext; an absent *active* key must not fail reads.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aes_gcm::aead::{OsRng, rand_core::RngCore};
use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeyRegistryError;

/// A 256-bit encryption key that is zeroized on drop.
///
/// The inner bytes are never exposed in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// Use with care — the caller must not log or persist these bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The currently active key: its identifier plus unwrapped material.
#[derive(Debug, Clone)]
pub struct ActiveKey {
    /// Key identifier embedded into new envelopes.
    pub id: String,
    /// Unwrapped key material.
    pub key: EncryptionKey,
}

/// Backing store for encryption keys.
///
/// Implementations unwrap stored data keys and expose them by id. The
/// legacy key decrypts pre-envelope payloads that carry no key reference.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Fetch the currently active key (id + material).
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::NoActiveKey`] if no key is marked active.
    async fn active_key(&self) -> Result<ActiveKey, KeyRegistryError>;

    /// Fetch key material by id.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::UnknownKey`] if the id does not exist.
    async fn key_material(&self, key_id: &str) -> Result<EncryptionKey, KeyRegistryError>;

    /// The key for legacy (unversioned) payloads, if one is configured.
    fn legacy_key(&self) -> Option<EncryptionKey>;
}

struct CachedActive {
    key: ActiveKey,
    fetched_at: Instant,
}

/// TTL-cached front over a [`KeyStore`].
///
/// The active key is cached for `ttl`; per-id material is cached without
/// expiry (key material is immutable once created). [`invalidate`] clears
/// both caches, for use after an explicit key roll.
///
/// [`invalidate`]: KeyRegistry::invalidate
pub struct KeyRegistry {
    store: Arc<dyn KeyStore>,
    ttl: Duration,
    active: RwLock<Option<CachedActive>>,
    materials: RwLock<HashMap<String, EncryptionKey>>,
}

impl KeyRegistry {
    /// Create a registry over the given store with the given active-key TTL.
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            active: RwLock::new(None),
            materials: RwLock::new(HashMap::new()),
        }
    }

    /// The currently active key, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::NoActiveKey`] if the store has no active
    /// key. Encrypt-path callers must propagate this as fatal.
    pub async fn active_key(&self) -> Result<ActiveKey, KeyRegistryError> {
        {
            let guard = self.active.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.key.clone());
                }
            }
        }

        let fetched = self.store.active_key().await?;

        let mut guard = self.active.write().await;
        *guard = Some(CachedActive {
            key: fetched.clone(),
            fetched_at: Instant::now(),
        });

        // Active material also serves the decrypt path.
        self.materials
            .write()
            .await
            .insert(fetched.id.clone(), fetched.key.clone());

        Ok(fetched)
    }

    /// The id of the currently active key.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::NoActiveKey`] if no key is active.
    pub async fn active_key_id(&self) -> Result<String, KeyRegistryError> {
        Ok(self.active_key().await?.id)
    }

    /// Key material by id, from cache when present.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRegistryError::UnknownKey`] if the id does not exist in
    /// the backing store.
    pub async fn key_material(&self, key_id: &str) -> Result<EncryptionKey, KeyRegistryError> {
        if let Some(key) = self.materials.read().await.get(key_id) {
            return Ok(key.clone());
        }

        let key = self.store.key_material(key_id).await?;
        self.materials
            .write()
            .await
            .insert(key_id.to_owned(), key.clone());
        Ok(key)
    }

    /// The legacy key for unversioned payloads, if configured.
    #[must_use]
    pub fn legacy_key(&self) -> Option<EncryptionKey> {
        self.store.legacy_key()
    }

    /// Drop all cached state. Call after rolling the active key.
    pub async fn invalidate(&self) {
        self.active.write().await.take();
        self.materials.write().await.clear();
    }
}

impl fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

/// In-memory key store for tests and single-node development.
///
/// Keys are inserted explicitly and the active id is switchable at runtime,
/// which makes deterministic key-rotation sequences easy to script in tests.
#[derive(Default)]
pub struct StaticKeyStore {
    keys: std::sync::RwLock<HashMap<String, EncryptionKey>>,
    active_id: std::sync::RwLock<Option<String>>,
    legacy: std::sync::RwLock<Option<EncryptionKey>>,
}

impl StaticKeyStore {
    /// Create an empty store with no active key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a key under the given id.
    pub fn insert_key(&self, key_id: &str, key: EncryptionKey) {
        if let Ok(mut keys) = self.keys.write() {
            keys.insert(key_id.to_owned(), key);
        }
    }

    /// Mark the given id as active. The key must already be inserted.
    pub fn set_active(&self, key_id: &str) {
        if let Ok(mut active) = self.active_id.write() {
            *active = Some(key_id.to_owned());
        }
    }

    /// Configure the legacy key for unversioned payloads.
    pub fn set_legacy(&self, key: EncryptionKey) {
        if let Ok(mut legacy) = self.legacy.write() {
            *legacy = Some(key);
        }
    }

    /// Clear the active key marker (no key is active afterwards).
    pub fn clear_active(&self) {
        if let Ok(mut active) = self.active_id.write() {
            *active = None;
        }
    }
}

#[async_trait]
impl KeyStore for StaticKeyStore {
    async fn active_key(&self) -> Result<ActiveKey, KeyRegistryError> {
        let id = self
            .active_id
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(KeyRegistryError::NoActiveKey)?;
        let key = self.key_material(&id).await?;
        Ok(ActiveKey { id, key })
    }

    async fn key_material(&self, key_id: &str) -> Result<EncryptionKey, KeyRegistryError> {
        self.keys
            .read()
            .ok()
            .and_then(|keys| keys.get(key_id).cloned())
            .ok_or_else(|| KeyRegistryError::UnknownKey {
                key_id: key_id.to_owned(),
            })
    }

    fn legacy_key(&self) -> Option<EncryptionKey> {
        self.legacy.read().ok().and_then(|guard| guard.clone())
    }
}

impl fmt::Debug for StaticKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn store_with_active(id: &str) -> Arc<StaticKeyStore> {
        let store = Arc::new(StaticKeyStore::new());
        store.insert_key(id, EncryptionKey::generate());
        store.set_active(id);
        store
    }

    #[tokio::test]
    async fn active_key_round_trips_through_registry() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(store, Duration::from_secs(60));
        assert_eq!(registry.active_key_id().await.unwrap(), "k1");
    }

    #[tokio::test]
    async fn no_active_key_fails() {
        let store = Arc::new(StaticKeyStore::new());
        store.insert_key("k1", EncryptionKey::generate());
        let registry = KeyRegistry::new(store, Duration::from_secs(60));
        assert!(matches!(
            registry.active_key().await,
            Err(KeyRegistryError::NoActiveKey)
        ));
    }

    #[tokio::test]
    async fn unknown_key_id_fails() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(store, Duration::from_secs(60));
        let err = registry.key_material("nope").await.unwrap_err();
        assert!(matches!(err, KeyRegistryError::UnknownKey { key_id } if key_id == "nope"));
    }

    #[tokio::test]
    async fn active_key_is_cached_within_ttl() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(Arc::clone(&store) as Arc<dyn KeyStore>, Duration::from_secs(3600));

        assert_eq!(registry.active_key_id().await.unwrap(), "k1");

        // Store moves on, but the cached answer stays until invalidation.
        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");
        assert_eq!(registry.active_key_id().await.unwrap(), "k1");
    }

    #[tokio::test]
    async fn zero_ttl_always_refetches() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(Arc::clone(&store) as Arc<dyn KeyStore>, Duration::ZERO);

        assert_eq!(registry.active_key_id().await.unwrap(), "k1");
        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");
        assert_eq!(registry.active_key_id().await.unwrap(), "k2");
    }

    #[tokio::test]
    async fn invalidate_clears_cached_active() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(Arc::clone(&store) as Arc<dyn KeyStore>, Duration::from_secs(3600));

        assert_eq!(registry.active_key_id().await.unwrap(), "k1");
        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");

        registry.invalidate().await;
        assert_eq!(registry.active_key_id().await.unwrap(), "k2");
    }

    #[tokio::test]
    async fn material_cache_serves_retired_keys() {
        let store = store_with_active("k1");
        let registry = KeyRegistry::new(Arc::clone(&store) as Arc<dyn KeyStore>, Duration::ZERO);

        // Decrypt path can fetch material even when another key is active.
        store.insert_key("k2", EncryptionKey::generate());
        store.set_active("k2");
        assert!(registry.key_material("k1").await.is_ok());
    }

    #[tokio::test]
    async fn decrypt_path_works_without_active_key() {
        let store = Arc::new(StaticKeyStore::new());
        store.insert_key("k1", EncryptionKey::generate());
        // No active key configured at all.
        let registry = KeyRegistry::new(Arc::clone(&store) as Arc<dyn KeyStore>, Duration::from_secs(60));

        assert!(registry.key_material("k1").await.is_ok());
        assert!(matches!(
            registry.active_key().await,
            Err(KeyRegistryError::NoActiveKey)
        ));
    }

    #[test]
    fn encryption_key_debug_redacts_bytes() {
        let key = EncryptionKey::generate();
        let debug = format!("{key:?}");
        assert!(debug.contains("[REDACTED]"));
    }
}
