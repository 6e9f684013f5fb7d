//! Token lifecycle routes — refresh, revoke, identity echo.
//!
//! `/auth/refresh` authenticates with the refresh token itself and issues a
//! **new access token only**: the refresh token is never rotated or
//! re-issued on this path. `/auth/revoke` and `/auth/me` require a bearer.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use varlock_core::token::{
    self, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_PREFIX, TokenKind,
};

use crate::auth::AuthIdentity;
use crate::error::ApiError;
use crate::repository;
use crate::state::AppState;

/// Request body for the refresh exchange.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub device_info: serde_json::Value,
}

/// Response for the refresh exchange.
#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

/// Request body for revocation. The presented bearer is always revoked;
/// a refresh token owned by the same user may be revoked alongside.
#[derive(Debug, Default, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Response for the identity echo.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub subject: String,
    pub auth_type: &'static str,
}

/// Build the unauthenticated auth router (refresh only).
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new().route("/auth/refresh", post(refresh))
}

/// Build the authenticated auth router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(me))
        .route("/auth/revoke", post(revoke))
}

/// `POST /v1/auth/refresh` — exchange a refresh token for a fresh access
/// token. The refresh token row is untouched except `last_used_at`.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    if body.refresh_token.is_empty() {
        return Err(ApiError::BadRequest("missing refresh token".to_owned()));
    }
    if !body.refresh_token.starts_with(REFRESH_TOKEN_PREFIX) {
        return Err(ApiError::BadRequest(
            "invalid refresh token format".to_owned(),
        ));
    }

    let token_hash = token::hash_token(&body.refresh_token);

    let Some(stored) = repository::get_personal_token_by_hash(&state.pool, &token_hash).await?
    else {
        return Err(ApiError::invalid_or_revoked_refresh());
    };

    if stored.kind != "refresh" {
        return Err(ApiError::invalid_or_revoked_refresh());
    }

    if let Some(expires_at) = stored.expires_at {
        if Utc::now() > expires_at {
            return Err(ApiError::refresh_token_expired());
        }
    }

    // Best-effort usage tracking on the refresh token itself.
    {
        let pool = state.pool.clone();
        let hash = token_hash.clone();
        tokio::spawn(async move {
            if let Err(e) = repository::touch_personal_token(&pool, &hash).await {
                tracing::warn!(error = %e, "failed to touch refresh token");
            }
        });
    }

    // Fresh device info wins; fall back to what the refresh token recorded.
    let metadata = if body.device_info.is_null() {
        stored.metadata.clone()
    } else {
        body.device_info.clone()
    };
    let hostname = metadata
        .get("hostname")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown-device")
        .to_owned();

    let access_token = token::generate_token(TokenKind::Access);
    repository::upsert_personal_token(
        &state.pool,
        stored.user_id,
        &format!("cli-access ({hostname})"),
        &token::hash_token(&access_token),
        "access",
        Utc::now() + Duration::seconds(ACCESS_TOKEN_TTL_SECS),
        &metadata,
    )
    .await?;

    Ok(Json(RefreshResponse {
        access_token,
        expires_in: ACCESS_TOKEN_TTL_SECS,
        token_type: "Bearer",
    }))
}

/// `GET /v1/auth/me` — echo the authenticated identity.
async fn me(Extension(identity): Extension<AuthIdentity>) -> Json<MeResponse> {
    match identity {
        AuthIdentity::User { user_id, .. } => Json(MeResponse {
            subject: user_id.to_string(),
            auth_type: "personal",
        }),
        AuthIdentity::Service { project_id, .. } => Json(MeResponse {
            subject: project_id.to_string(),
            auth_type: "service",
        }),
    }
}

/// `POST /v1/auth/revoke` — delete the presented bearer's token row, and
/// optionally the caller's refresh token (full device logout).
async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    body: Option<Json<RevokeRequest>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let AuthIdentity::User {
        user_id,
        token_hash,
        ..
    } = identity
    else {
        return Err(ApiError::Forbidden(
            "service tokens are revoked through their project".to_owned(),
        ));
    };

    let Json(body) = body.unwrap_or_default();

    repository::delete_personal_token_by_hash(&state.pool, &token_hash).await?;

    if let Some(refresh_token) = body.refresh_token {
        let refresh_hash = token::hash_token(&refresh_token);
        // Only the owner may revoke a refresh token through this path.
        if let Some(stored) =
            repository::get_personal_token_by_hash(&state.pool, &refresh_hash).await?
        {
            if stored.user_id == user_id {
                repository::delete_personal_token_by_hash(&state.pool, &refresh_hash).await?;
            }
        }
    }

    tracing::info!(user_id = %user_id, "tokens revoked");
    Ok(Json(serde_json::json!({ "ok": true })))
}
