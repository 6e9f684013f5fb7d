//! Read-repair rotator.
//!
//! Secrets encrypted under a retired key (or in the legacy format) are
//! upgraded lazily: after a read completes and the response is already
//! prepared, stale values are queued here and re-encrypted under the active
//! key by a small worker pool. The read itself is never blocked and never
//! sees a rotation failure.
//!
//! Persistence goes through a [`RepairStore`] — a privileged write path
//! that bypasses per-row authorization, because the reader who triggered
//! the repair may hold read-only access while the rewrite must still land.
//!
//! Concurrency: multiple readers may race to rotate the same secret. Each
//! rotation independently produces a valid envelope under the active key,
//! so the last writer wins and no data is lost — only work is duplicated.
//! No locks are taken.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::envelope::EnvelopeCipher;
use crate::error::RotationError;

/// Privileged persistence path for rotated ciphertexts.
///
/// Implementations write the new value unconditionally (single-row update,
/// no authorization checks, no compare-and-swap) — correctness relies on
/// every racer producing a valid envelope, not on mutual exclusion.
#[async_trait]
pub trait RepairStore: Send + Sync {
    /// Persist a rotated value for the given secret.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::Store`] if the write fails. The worker logs
    /// and swallows it; the triggering reader never sees it.
    async fn persist_rotated(
        &self,
        secret_id: Uuid,
        new_value: &str,
        new_key_id: &str,
    ) -> Result<(), RotationError>;
}

/// A single queued repair.
#[derive(Debug, Clone)]
pub struct RotationTask {
    /// The secret to rewrite.
    pub secret_id: Uuid,
    /// Its stored value as observed by the read that detected staleness.
    pub stored_value: String,
}

/// Sizing for the rotator queue and worker pool.
#[derive(Debug, Clone, Copy)]
pub struct RotatorConfig {
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded queue depth. When full, new tasks are dropped (the next read
    /// of the same secret re-detects staleness and tries again).
    pub queue_depth: usize,
}

impl Default for RotatorConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_depth: 256,
        }
    }
}

/// Cloneable scheduling handle for the rotator.
///
/// `schedule` never blocks and never fails the caller: a full queue drops
/// the task with a warning and bumps a counter.
#[derive(Clone)]
pub struct RotatorHandle {
    tx: mpsc::Sender<RotationTask>,
    dropped: Arc<AtomicU64>,
}

impl RotatorHandle {
    /// Queue a repair. Non-blocking; drops (with a log) when the queue is
    /// full or the rotator has shut down.
    pub fn schedule(&self, task: RotationTask) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(secret_id = %task.secret_id, "rotation queue full, dropping repair task");
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                debug!(secret_id = %task.secret_id, "rotator stopped, dropping repair task");
            }
        }
    }

    /// Number of tasks dropped because the queue was full.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for RotatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatorHandle")
            .field("dropped", &self.dropped_count())
            .finish_non_exhaustive()
    }
}

/// The worker half of the rotator, held by whoever owns shutdown.
pub struct RotatorWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl RotatorWorkers {
    /// Drain and stop: once every [`RotatorHandle`] clone is dropped, the
    /// workers finish the queued tasks and exit. Waits up to `timeout` for
    /// that to happen.
    pub async fn shutdown(self, timeout: Duration) {
        for handle in self.handles {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("rotation worker did not stop within timeout");
            }
        }
    }
}

impl fmt::Debug for RotatorWorkers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatorWorkers")
            .field("workers", &self.handles.len())
            .finish()
    }
}

/// Start the rotator: a bounded queue feeding `config.workers` workers.
///
/// Returns the scheduling handle and the worker set. Dropping every clone
/// of the handle closes the queue; the workers then drain it and exit.
#[must_use]
pub fn spawn(
    cipher: Arc<EnvelopeCipher>,
    store: Arc<dyn RepairStore>,
    config: RotatorConfig,
) -> (RotatorHandle, RotatorWorkers) {
    let workers = config.workers.max(1);
    let (tx, rx) = mpsc::channel::<RotationTask>(config.queue_depth.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let cipher = Arc::clone(&cipher);
        let store = Arc::clone(&store);
        let rx = Arc::clone(&rx);
        handles.push(tokio::spawn(async move {
            worker_loop(worker_id, &cipher, &*store, &rx).await;
        }));
    }

    info!(workers, queue_depth = config.queue_depth, "read-repair rotator started");

    (
        RotatorHandle {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        RotatorWorkers { handles },
    )
}

/// Pull tasks until the queue closes. Every failure is logged and
/// swallowed — rotation is strictly best-effort.
async fn worker_loop(
    worker_id: usize,
    cipher: &EnvelopeCipher,
    store: &dyn RepairStore,
    rx: &Mutex<mpsc::Receiver<RotationTask>>,
) {
    loop {
        let task = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(task) = task else {
            debug!(worker_id, "rotation worker stopping");
            return;
        };

        match cipher.re_encrypt(&task.stored_value).await {
            Ok((new_value, new_key_id)) => {
                match store
                    .persist_rotated(task.secret_id, &new_value, &new_key_id)
                    .await
                {
                    Ok(()) => {
                        debug!(secret_id = %task.secret_id, key_id = %new_key_id, "secret rotated");
                    }
                    Err(e) => {
                        warn!(secret_id = %task.secret_id, error = %e, "failed to persist rotated secret");
                    }
                }
            }
            Err(e) => {
                warn!(secret_id = %task.secret_id, error = %e, "failed to re-encrypt stale secret");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::envelope::{self, is_stale};
    use crate::keyring::{EncryptionKey, KeyRegistry, KeyStore, StaticKeyStore};

    /// In-memory repair store recording every persisted rotation.
    #[derive(Default)]
    struct RecordingStore {
        rows: std::sync::Mutex<HashMap<Uuid, (String, String)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RepairStore for RecordingStore {
        async fn persist_rotated(
            &self,
            secret_id: Uuid,
            new_value: &str,
            new_key_id: &str,
        ) -> Result<(), RotationError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(RotationError::Store {
                    reason: "injected failure".to_owned(),
                });
            }
            self.rows
                .lock()
                .unwrap()
                .insert(secret_id, (new_value.to_owned(), new_key_id.to_owned()));
            Ok(())
        }
    }

    fn fixture() -> (Arc<EnvelopeCipher>, Arc<StaticKeyStore>) {
        let store = Arc::new(StaticKeyStore::new());
        store.insert_key("k1", EncryptionKey::generate());
        store.set_active("k1");
        let registry = Arc::new(KeyRegistry::new(
            Arc::clone(&store) as Arc<dyn KeyStore>,
            Duration::ZERO,
        ));
        (Arc::new(EnvelopeCipher::new(registry)), store)
    }

    #[tokio::test]
    async fn read_repair_upgrades_a_stale_secret() {
        let (cipher, keys) = fixture();
        let stored = cipher.encrypt("sk_live_123").await.unwrap();
        assert!(stored.starts_with("v1:k1:"));

        // Roll the active key; the stored value is now stale.
        keys.insert_key("k2", EncryptionKey::generate());
        keys.set_active("k2");
        assert!(is_stale(&stored, "k2"));

        let repair = Arc::new(RecordingStore::default());
        let (handle, workers) = spawn(
            Arc::clone(&cipher),
            Arc::clone(&repair) as Arc<dyn RepairStore>,
            RotatorConfig::default(),
        );

        let secret_id = Uuid::new_v4();
        handle.schedule(RotationTask {
            secret_id,
            stored_value: stored,
        });

        drop(handle);
        workers.shutdown(Duration::from_secs(5)).await;

        let (new_value, new_key_id) = {
            let rows = repair.rows.lock().unwrap();
            rows.get(&secret_id).unwrap().clone()
        };
        assert_eq!(new_key_id, "k2");
        assert!(new_value.starts_with("v1:k2:"));

        // Rotation preserves meaning.
        assert_eq!(cipher.decrypt(&new_value).await.unwrap(), "sk_live_123");
    }

    #[tokio::test]
    async fn legacy_values_are_upgraded_too() {
        let (cipher, keys) = fixture();
        let legacy_key = EncryptionKey::generate();
        keys.set_legacy(legacy_key.clone());

        use base64::Engine as _;
        let stored = base64::engine::general_purpose::STANDARD
            .encode(envelope::seal(&legacy_key, b"old secret").unwrap());
        assert!(is_stale(&stored, "k1"));

        let repair = Arc::new(RecordingStore::default());
        let (handle, workers) = spawn(
            Arc::clone(&cipher),
            Arc::clone(&repair) as Arc<dyn RepairStore>,
            RotatorConfig::default(),
        );

        let secret_id = Uuid::new_v4();
        handle.schedule(RotationTask {
            secret_id,
            stored_value: stored,
        });
        drop(handle);
        workers.shutdown(Duration::from_secs(5)).await;

        let rows = repair.rows.lock().unwrap();
        let (new_value, new_key_id) = rows.get(&secret_id).unwrap();
        assert_eq!(new_key_id, "k1");
        assert!(new_value.starts_with("v1:k1:"));
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_workers_keep_going() {
        let (cipher, _keys) = fixture();
        let repair = Arc::new(RecordingStore::default());
        repair.fail.store(true, Ordering::Relaxed);

        let (handle, workers) = spawn(
            Arc::clone(&cipher),
            Arc::clone(&repair) as Arc<dyn RepairStore>,
            RotatorConfig::default(),
        );

        // A store failure on one task must not kill the worker.
        let failing = cipher.encrypt("a").await.unwrap();
        handle.schedule(RotationTask {
            secret_id: Uuid::new_v4(),
            stored_value: failing,
        });

        // An undecryptable value must not kill the worker either.
        handle.schedule(RotationTask {
            secret_id: Uuid::new_v4(),
            stored_value: "v1:k1:!!!not-base64".to_owned(),
        });

        repair.fail.store(false, Ordering::Relaxed);
        let ok_id = Uuid::new_v4();
        let ok_value = cipher.encrypt("b").await.unwrap();
        handle.schedule(RotationTask {
            secret_id: ok_id,
            stored_value: ok_value,
        });

        drop(handle);
        workers.shutdown(Duration::from_secs(5)).await;

        let rows = repair.rows.lock().unwrap();
        assert!(rows.contains_key(&ok_id));
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (cipher, keys) = fixture();
        // No workers pulling yet: single-slot queue, one worker that we
        // never let run by keeping queue_depth at 1 and scheduling from the
        // same task before yielding.
        let repair = Arc::new(RecordingStore::default());
        let (handle, workers) = spawn(
            Arc::clone(&cipher),
            Arc::clone(&repair) as Arc<dyn RepairStore>,
            RotatorConfig {
                workers: 1,
                queue_depth: 1,
            },
        );

        keys.set_active("k1");
        let stored = cipher.encrypt("x").await.unwrap();

        // Flood without yielding; at least one task must be dropped, and
        // schedule must never block or error.
        for _ in 0..64 {
            handle.schedule(RotationTask {
                secret_id: Uuid::new_v4(),
                stored_value: stored.clone(),
            });
        }

        assert!(handle.dropped_count() > 0);
        drop(handle);
        workers.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn concurrent_rotations_of_the_same_secret_are_benign() {
        let (cipher, keys) = fixture();
        let stored = cipher.encrypt("shared").await.unwrap();
        keys.insert_key("k2", EncryptionKey::generate());
        keys.set_active("k2");

        let repair = Arc::new(RecordingStore::default());
        let (handle, workers) = spawn(
            Arc::clone(&cipher),
            Arc::clone(&repair) as Arc<dyn RepairStore>,
            RotatorConfig {
                workers: 4,
                queue_depth: 64,
            },
        );

        // Many readers race to repair the same secret.
        let secret_id = Uuid::new_v4();
        for _ in 0..16 {
            handle.schedule(RotationTask {
                secret_id,
                stored_value: stored.clone(),
            });
        }
        drop(handle);
        workers.shutdown(Duration::from_secs(5)).await;

        // Last writer wins; whatever landed is a valid envelope under k2.
        let (new_value, new_key_id) = {
            let rows = repair.rows.lock().unwrap();
            rows.get(&secret_id).unwrap().clone()
        };
        assert_eq!(new_key_id, "k2");
        assert_eq!(cipher.decrypt(&new_value).await.unwrap(), "shared");
    }
}
