//! End-to-end rotation flow through the public API.
//!
//! Drives the key registry, envelope cipher, and read-repair rotator
//! together the way the server does: encrypt under one key, roll the
//! active key, detect staleness on read, repair in the background, and
//! verify the stored value converged without changing meaning.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use varlock_core::envelope::{self, EnvelopeCipher};
use varlock_core::error::RotationError;
use varlock_core::keyring::{EncryptionKey, KeyRegistry, KeyStore, StaticKeyStore};
use varlock_core::rotator::{self, RepairStore, RotationTask, RotatorConfig};

/// Repair store over a shared in-memory secrets table.
struct TableStore {
    rows: Arc<Mutex<HashMap<Uuid, String>>>,
}

#[async_trait]
impl RepairStore for TableStore {
    async fn persist_rotated(
        &self,
        secret_id: Uuid,
        new_value: &str,
        _new_key_id: &str,
    ) -> Result<(), RotationError> {
        self.rows
            .lock()
            .map_err(|e| RotationError::Store {
                reason: e.to_string(),
            })?
            .insert(secret_id, new_value.to_owned());
        Ok(())
    }
}

#[tokio::test]
async fn stale_secret_converges_to_active_key_on_read() {
    let keys = Arc::new(StaticKeyStore::new());
    keys.insert_key("k1", EncryptionKey::generate());
    keys.set_active("k1");

    let registry = Arc::new(KeyRegistry::new(
        Arc::clone(&keys) as Arc<dyn KeyStore>,
        Duration::ZERO,
    ));
    let cipher = Arc::new(EnvelopeCipher::new(registry));

    // Write a secret under k1.
    let rows: Arc<Mutex<HashMap<Uuid, String>>> = Arc::new(Mutex::new(HashMap::new()));
    let secret_id = Uuid::new_v4();
    let stored = cipher.encrypt("sk_live_123").await.unwrap();
    assert!(stored.starts_with("v1:k1:"));
    rows.lock().unwrap().insert(secret_id, stored.clone());

    // Roll to k2. Nothing is rewritten yet.
    keys.insert_key("k2", EncryptionKey::generate());
    keys.set_active("k2");

    let (handle, workers) = rotator::spawn(
        Arc::clone(&cipher),
        Arc::new(TableStore {
            rows: Arc::clone(&rows),
        }),
        RotatorConfig::default(),
    );

    // A read observes the stale envelope and queues a repair. The response
    // (decrypt with the embedded key) works regardless.
    assert_eq!(cipher.decrypt(&stored).await.unwrap(), "sk_live_123");
    assert!(envelope::is_stale(&stored, "k2"));
    handle.schedule(RotationTask {
        secret_id,
        stored_value: stored,
    });

    drop(handle);
    workers.shutdown(Duration::from_secs(5)).await;

    // The stored value converged to the active key, same plaintext.
    let repaired = rows.lock().unwrap().get(&secret_id).cloned().unwrap();
    assert!(repaired.starts_with("v1:k2:"));
    assert!(!envelope::is_stale(&repaired, "k2"));
    assert_eq!(cipher.decrypt(&repaired).await.unwrap(), "sk_live_123");
}

#[tokio::test]
async fn repaired_value_stays_valid_if_key_rolls_mid_flight() {
    // The active key may change while a repair is in flight; the repair
    // then lands under a just-retired key. That envelope is still valid
    // and a later read detects it as stale again — convergence, not
    // corruption.
    let keys = Arc::new(StaticKeyStore::new());
    keys.insert_key("k1", EncryptionKey::generate());
    keys.insert_key("k2", EncryptionKey::generate());
    keys.set_active("k1");

    let registry = Arc::new(KeyRegistry::new(
        Arc::clone(&keys) as Arc<dyn KeyStore>,
        Duration::ZERO,
    ));
    let cipher = Arc::new(EnvelopeCipher::new(registry));

    let stored = cipher.encrypt("value").await.unwrap();

    // Repair re-encrypts under k2...
    keys.set_active("k2");
    let (repaired, key_id) = cipher.re_encrypt(&stored).await.unwrap();
    assert_eq!(key_id, "k2");

    // ...but k3 became active before the write landed.
    keys.insert_key("k3", EncryptionKey::generate());
    keys.set_active("k3");

    assert_eq!(cipher.decrypt(&repaired).await.unwrap(), "value");
    assert!(envelope::is_stale(&repaired, "k3"));
}
