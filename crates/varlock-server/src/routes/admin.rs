//! Key administration routes.
//!
//! Gated by a shared operator secret (`X-Admin-Secret`), separate from the
//! user-facing auth stack. `roll` introduces a new active data key without
//! rewriting any secrets; `scavenge` batch-rotates cold rows that
//! read-repair has not touched.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use varlock_core::token::hash_token;

use crate::error::ApiError;
use crate::rotation;
use crate::state::AppState;

/// Request body for the scavenger.
#[derive(Debug, Default, Deserialize)]
pub struct ScavengeRequest {
    pub batch_size: Option<i64>,
}

/// Build the admin router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/keys/roll", post(roll_key))
        .route("/admin/keys/scavenge", post(scavenge))
}

/// `POST /v1/admin/keys/roll` — mint a new active data key.
///
/// Old ciphertexts stay decryptable via their embedded key id; read-repair
/// and the scavenger converge them lazily.
async fn roll_key(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    require_admin(&state, &headers)?;

    let key_id = state.keystore.roll().await?;
    // Drop the cached active key so new encrypts pick up the roll at once.
    state.registry.invalidate().await;

    Ok(Json(serde_json::json!({ "ok": true, "key_id": key_id })))
}

/// `POST /v1/admin/keys/scavenge` — rotate up to one batch of stale rows.
async fn scavenge(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<ScavengeRequest>>,
) -> Result<Json<rotation::ScavengeReport>, ApiError> {
    require_admin(&state, &headers)?;

    let Json(body) = body.unwrap_or_default();
    let batch_size = body
        .batch_size
        .unwrap_or(state.config.scavenge_batch_size)
        .clamp(1, 1000);

    let report = rotation::scavenge(&state, batch_size).await?;
    tracing::info!(
        scanned = report.scanned,
        rotated = report.rotated,
        failed = report.failed,
        "scavenge batch complete"
    );

    Ok(Json(report))
}

/// Check the operator secret. Hash-then-compare keeps the check
/// constant-time with respect to the secret contents.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(configured) = state.config.admin_secret.as_deref() else {
        return Err(ApiError::NotFound(
            "key administration is not enabled".to_owned(),
        ));
    };

    let presented = headers
        .get("x-admin-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Admin-Secret header".to_owned()))?;

    if hash_token(presented) != hash_token(configured) {
        return Err(ApiError::Unauthorized("invalid admin secret".to_owned()));
    }

    Ok(())
}
