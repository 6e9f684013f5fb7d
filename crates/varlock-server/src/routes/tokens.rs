//! Service token management routes.
//!
//! Service tokens are project-scoped credentials for CI/CD and production
//! runtimes — no user behind them, no role resolution. SHA-256 hashed
//! before storage; the plaintext is returned exactly once at creation.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use varlock_core::token::{self, TokenKind};

use crate::auth::AuthIdentity;
use crate::authz;
use crate::error::ApiError;
use crate::models::ServiceToken;
use crate::repository;
use crate::state::AppState;

/// Request body for creating a service token.
#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub name: String,
    #[serde(default = "default_permissions")]
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_permissions() -> Vec<String> {
    vec!["read".to_owned()]
}

/// Response for token creation (includes the plaintext — shown only once).
#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token: ServiceToken,
    /// The plaintext token. Store it securely — it cannot be retrieved again.
    pub plaintext_token: String,
}

/// Response for token listing.
#[derive(Debug, Serialize)]
pub struct TokenListResponse {
    pub tokens: Vec<ServiceToken>,
}

/// Build the service-token router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/projects/{project_id}/tokens",
            post(create_token).get(list_tokens),
        )
        .route(
            "/projects/{project_id}/tokens/{token_id}/revoke",
            post(revoke_token),
        )
}

/// `POST /v1/projects/{project_id}/tokens` — create a service token.
async fn create_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<CreateTokenRequest>,
) -> Result<Json<CreateTokenResponse>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_write(&state.pool, project_id, user_id).await?;

    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_owned()));
    }

    let valid_perms = ["read", "write"];
    for perm in &body.permissions {
        if !valid_perms.contains(&perm.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "invalid permission '{perm}' — must be one of: {}",
                valid_perms.join(", ")
            )));
        }
    }

    let plaintext = token::generate_token(TokenKind::Service);
    let hash = token::hash_token(&plaintext);
    let prefix = token::display_prefix(&plaintext);

    let created = repository::create_service_token(
        &state.pool,
        project_id,
        body.name.trim(),
        &hash,
        &prefix,
        &body.permissions,
        body.expires_at,
        user_id,
    )
    .await?;

    tracing::info!(project_id = %project_id, name = %created.name, "service token created");

    Ok(Json(CreateTokenResponse {
        token: created,
        plaintext_token: plaintext,
    }))
}

/// `GET /v1/projects/{project_id}/tokens` — list service tokens.
async fn list_tokens(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<TokenListResponse>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_role(&state.pool, project_id, user_id).await?;

    let tokens = repository::list_service_tokens(&state.pool, project_id).await?;
    Ok(Json(TokenListResponse { tokens }))
}

/// `POST /v1/projects/{project_id}/tokens/{token_id}/revoke`
async fn revoke_token(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path((project_id, token_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_write(&state.pool, project_id, user_id).await?;

    repository::revoke_service_token(&state.pool, token_id, project_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
