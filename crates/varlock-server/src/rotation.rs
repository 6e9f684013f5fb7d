//! Read-repair wiring and the key scavenger.
//!
//! [`PgRepairStore`] gives the core rotator its privileged persistence
//! path. [`schedule_stale`] is called after secret reads, once the response
//! data is already built — it detects envelopes not under the active key
//! and queues them without ever blocking or failing the read.
//!
//! The scavenger complements read-repair for cold rows: an admin-triggered
//! batch that rewrites up to N stale secrets in one pass.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use varlock_core::envelope;
use varlock_core::error::RotationError;
use varlock_core::rotator::{RepairStore, RotationTask};

use crate::error::ApiError;
use crate::models::SecretRow;
use crate::state::AppState;

/// Privileged rotation sink over the `secrets` table.
///
/// Bypasses per-row authorization: the reader who triggered a repair may
/// hold read-only access, yet the rewrite must land.
pub struct PgRepairStore {
    pool: PgPool,
}

impl PgRepairStore {
    /// Create a repair store over the given pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RepairStore for PgRepairStore {
    async fn persist_rotated(
        &self,
        secret_id: Uuid,
        new_value: &str,
        new_key_id: &str,
    ) -> Result<(), RotationError> {
        crate::repository::rotate_secret(&self.pool, secret_id, new_value, new_key_id)
            .await
            .map_err(|e| RotationError::Store {
                reason: e.to_string(),
            })
    }
}

impl std::fmt::Debug for PgRepairStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRepairStore").finish_non_exhaustive()
    }
}

/// Queue read-repair for every stale value in a read set.
///
/// Runs after the response has been prepared. Never fails the caller: if
/// no active key is available, rotation is silently skipped (the decrypt
/// path does not depend on it).
pub async fn schedule_stale(state: &AppState, secrets: &[SecretRow]) {
    let active_key_id = match state.registry.active_key_id().await {
        Ok(id) => id,
        Err(e) => {
            // Can't know what "stale" means without an active key.
            tracing::debug!(error = %e, "skipping read-repair: no active key");
            return;
        }
    };

    for secret in secrets {
        if envelope::is_stale(&secret.value, &active_key_id) {
            state.rotator.schedule(RotationTask {
                secret_id: secret.id,
                stored_value: secret.value.clone(),
            });
        }
    }
}

/// Result of one scavenger batch.
#[derive(Debug, serde::Serialize)]
pub struct ScavengeReport {
    /// Stale rows examined in this batch.
    pub scanned: usize,
    /// Successfully rewritten under the active key.
    pub rotated: usize,
    /// Left untouched (decrypt or persist failure, logged).
    pub failed: usize,
}

/// Rewrite up to `batch_size` stale secrets under the active key.
///
/// Unlike read-repair this runs synchronously — the admin caller wants the
/// counts. Per-row failures are logged and counted, never fatal to the
/// batch.
///
/// # Errors
///
/// Returns `ApiError` when no active key is configured or the stale scan
/// itself fails.
pub async fn scavenge(state: &AppState, batch_size: i64) -> Result<ScavengeReport, ApiError> {
    let active_key_id = state.registry.active_key_id().await?;
    let stale = crate::repository::find_stale_secrets(&state.pool, &active_key_id, batch_size).await?;

    let mut rotated = 0usize;
    let mut failed = 0usize;

    for secret in &stale {
        match state.cipher.re_encrypt(&secret.value).await {
            Ok((new_value, new_key_id)) => {
                match crate::repository::rotate_secret(&state.pool, secret.id, &new_value, &new_key_id)
                    .await
                {
                    Ok(()) => rotated += 1,
                    Err(e) => {
                        failed += 1;
                        tracing::warn!(secret_id = %secret.id, error = %e, "scavenger failed to persist rotation");
                    }
                }
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(secret_id = %secret.id, error = %e, "scavenger failed to re-encrypt secret");
            }
        }
    }

    Ok(ScavengeReport {
        scanned: stale.len(),
        rotated,
        failed,
    })
}
