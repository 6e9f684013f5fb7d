//! Secret routes — read, bulk push, delete, and per-secret sharing.
//!
//! Reads decrypt through the envelope cipher. A value that fails to
//! decrypt is logged and returned *as stored* — reads stay available at
//! the cost of occasionally surfacing garbled data; that tradeoff is
//! deliberate. After the response data is built, stale envelopes are
//! queued for background read-repair; the read never waits on it.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::authz;
use crate::error::ApiError;
use crate::models::SecretRow;
use crate::repository;
use crate::rotation;
use crate::state::AppState;

/// Maximum secret key length.
const MAX_KEY_LEN: usize = 256;

/// Maximum secret value size (1 MiB).
const MAX_VALUE_LEN: usize = 1_048_576;

/// Query string for environment selection.
#[derive(Debug, Default, Deserialize)]
pub struct EnvironmentQuery {
    pub environment: Option<String>,
}

/// One key/value pair in a push.
#[derive(Debug, Deserialize)]
pub struct SecretPayload {
    pub key: String,
    pub value: String,
}

/// Request body for a bulk push.
#[derive(Debug, Deserialize)]
pub struct PushSecretsRequest {
    pub secrets: Vec<SecretPayload>,
    pub environment: Option<String>,
}

/// A decrypted secret in a read response.
#[derive(Debug, Serialize)]
pub struct SecretView {
    pub id: Uuid,
    pub key: String,
    pub value: String,
}

/// Response for a read.
#[derive(Debug, Serialize)]
pub struct SecretListResponse {
    pub environment: String,
    pub secrets: Vec<SecretView>,
}

/// Request body for sharing one secret.
#[derive(Debug, Deserialize)]
pub struct ShareSecretRequest {
    pub user_id: Uuid,
}

/// Build the secrets router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects/{project_id}/secrets",
            get(list_secrets).post(push_secrets),
        )
        .route(
            "/projects/{project_id}/secrets/{key}",
            delete(delete_secret),
        )
        .route("/secrets/{secret_id}", get(get_secret))
        .route("/secrets/{secret_id}/share", post(share_secret))
        .route(
            "/secrets/{secret_id}/share/{user_id}",
            delete(unshare_secret),
        )
}

/// `GET /v1/projects/{project_id}/secrets?environment=slug`
///
/// Project-role holders see every secret in the environment; users with
/// only per-secret shares see exactly those secrets. Values are decrypted;
/// a decrypt failure passes the stored string through unchanged.
async fn list_secrets(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<Json<SecretListResponse>, ApiError> {
    let environment =
        repository::resolve_environment(&state.pool, project_id, query.environment.as_deref())
            .await?;

    let rows = match &identity {
        AuthIdentity::User { user_id, .. } => {
            match authz::project_role(&state.pool, project_id, *user_id).await? {
                Some(_) => repository::list_secrets(&state.pool, environment.id).await?,
                None => {
                    // No project-wide role: fall back to per-secret shares.
                    let shared =
                        repository::list_shared_secrets(&state.pool, environment.id, *user_id)
                            .await?;
                    if shared.is_empty() {
                        return Err(ApiError::NotFound(
                            "project not found or access denied".to_owned(),
                        ));
                    }
                    shared
                }
            }
        }
        AuthIdentity::Service {
            project_id: token_project,
            permissions,
            ..
        } => {
            require_service_scope(*token_project, project_id, permissions, "read")?;
            repository::list_secrets(&state.pool, environment.id).await?
        }
    };

    let mut secrets = Vec::with_capacity(rows.len());
    for row in &rows {
        secrets.push(SecretView {
            id: row.id,
            key: row.key.clone(),
            value: decrypt_fail_soft(&state, row).await,
        });
    }

    // Response data is complete — now queue repairs for stale envelopes.
    rotation::schedule_stale(&state, &rows).await;

    Ok(Json(SecretListResponse {
        environment: environment.slug,
        secrets,
    }))
}

/// `GET /v1/secrets/{secret_id}`
///
/// Read one secret. Visible to project-role holders and to users holding
/// a share on exactly this secret — the share grants visibility of this
/// one value and nothing else.
async fn get_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(secret_id): Path<Uuid>,
) -> Result<Json<SecretView>, ApiError> {
    let user_id = identity.require_user()?;
    let row = repository::get_secret(&state.pool, secret_id).await?;

    let has_role = authz::project_role(&state.pool, row.project_id, user_id)
        .await?
        .is_some();
    if !has_role && !authz::has_secret_access(&state.pool, secret_id, user_id).await? {
        // Same shape as a missing row; shares must not leak existence.
        return Err(ApiError::NotFound("secret not found".to_owned()));
    }

    let view = SecretView {
        id: row.id,
        key: row.key.clone(),
        value: decrypt_fail_soft(&state, &row).await,
    };

    rotation::schedule_stale(&state, std::slice::from_ref(&row)).await;

    Ok(Json(view))
}

/// `POST /v1/projects/{project_id}/secrets`
///
/// Bulk upsert. Requires write permission; every value is encrypted under
/// the active key before it reaches storage.
async fn push_secrets(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<PushSecretsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let actor_id = match &identity {
        AuthIdentity::User { user_id, .. } => {
            authz::require_write(&state.pool, project_id, *user_id).await?;
            *user_id
        }
        AuthIdentity::Service {
            token_id,
            project_id: token_project,
            permissions,
        } => {
            require_service_scope(*token_project, project_id, permissions, "write")?;
            *token_id
        }
    };

    if body.secrets.is_empty() {
        return Err(ApiError::BadRequest("no secrets in payload".to_owned()));
    }
    for secret in &body.secrets {
        if secret.key.is_empty() || secret.key.len() > MAX_KEY_LEN {
            return Err(ApiError::BadRequest(format!(
                "secret key must be 1-{MAX_KEY_LEN} characters"
            )));
        }
        if secret.value.len() > MAX_VALUE_LEN {
            return Err(ApiError::BadRequest(format!(
                "secret value for '{}' exceeds 1MB",
                secret.key
            )));
        }
    }

    let environment =
        repository::resolve_environment(&state.pool, project_id, body.environment.as_deref())
            .await?;

    let mut count = 0usize;
    for secret in &body.secrets {
        let encrypted = state.cipher.encrypt(&secret.value).await?;
        let key_id = varlock_core::envelope::embedded_key_id(&encrypted)
            .unwrap_or_default()
            .to_owned();

        repository::upsert_secret(
            &state.pool,
            project_id,
            environment.id,
            &secret.key,
            &encrypted,
            &key_id,
            actor_id,
        )
        .await?;
        count += 1;
    }

    tracing::info!(
        project_id = %project_id,
        environment = %environment.slug,
        count,
        "secrets pushed"
    );

    Ok(Json(serde_json::json!({ "ok": true, "count": count })))
}

/// `DELETE /v1/projects/{project_id}/secrets/{key}?environment=slug`
async fn delete_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path((project_id, key)): Path<(Uuid, String)>,
    Query(query): Query<EnvironmentQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match &identity {
        AuthIdentity::User { user_id, .. } => {
            authz::require_write(&state.pool, project_id, *user_id).await?;
        }
        AuthIdentity::Service {
            project_id: token_project,
            permissions,
            ..
        } => {
            require_service_scope(*token_project, project_id, permissions, "write")?;
        }
    }

    let environment =
        repository::resolve_environment(&state.pool, project_id, query.environment.as_deref())
            .await?;

    repository::delete_secret(&state.pool, environment.id, &key).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /v1/secrets/{secret_id}/share` — grant one user visibility of
/// exactly this secret.
///
/// The actor must hold write on the secret's project. The grant is for
/// outsiders: a user who already holds a project role gets nothing from a
/// share, so that request is rejected.
async fn share_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(secret_id): Path<Uuid>,
    Json(body): Json<ShareSecretRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = identity.require_user()?;

    let secret = repository::get_secret(&state.pool, secret_id).await?;
    authz::require_write(&state.pool, secret.project_id, user_id).await?;

    if authz::project_role(&state.pool, secret.project_id, body.user_id)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "user already has project-wide access".to_owned(),
        ));
    }

    let share = repository::create_share(&state.pool, secret_id, body.user_id).await?;
    tracing::info!(secret_id = %secret_id, user_id = %share.user_id, "secret shared");

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `DELETE /v1/secrets/{secret_id}/share/{user_id}` — revoke a share.
async fn unshare_secret(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path((secret_id, target_user)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = identity.require_user()?;

    let secret = repository::get_secret(&state.pool, secret_id).await?;
    authz::require_write(&state.pool, secret.project_id, user_id).await?;

    repository::delete_share(&state.pool, secret_id, target_user).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Decrypt a stored value, or pass it through unchanged on failure.
async fn decrypt_fail_soft(state: &AppState, row: &SecretRow) -> String {
    match state.cipher.decrypt(&row.value).await {
        Ok(plaintext) => plaintext,
        Err(e) => {
            tracing::error!(
                secret_id = %row.id,
                key = %row.key,
                error = %e,
                "failed to decrypt secret, returning stored value"
            );
            row.value.clone()
        }
    }
}

/// Scope check for service identities: right project, required permission.
fn require_service_scope(
    token_project: Uuid,
    requested_project: Uuid,
    permissions: &[String],
    needed: &str,
) -> Result<(), ApiError> {
    if token_project != requested_project {
        return Err(ApiError::Forbidden(
            "service token is not scoped to this project".to_owned(),
        ));
    }
    if !permissions.iter().any(|p| p == needed) {
        return Err(ApiError::Forbidden(format!(
            "service token does not have {needed} permission"
        )));
    }
    Ok(())
}
