//! Device-code flow routes.
//!
//! A headless CLI calls `POST /v1/device/code`, shows the user code, and
//! polls `POST /v1/device/token`. A browser-authenticated user approves or
//! denies the code. The approved poll atomically consumes the session and
//! returns an access/refresh token pair; a second poll for the same device
//! code gets `invalid_device_code`.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Extension, Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use varlock_core::device::{
    self, DEVICE_CODE_TTL_SECS, POLL_INTERVAL_SECS, PollDecision, SessionStatus,
};
use varlock_core::token::{
    self, ACCESS_TOKEN_TTL_SECS, REFRESH_TOKEN_TTL_SECS, TokenKind,
};

use crate::auth::AuthIdentity;
use crate::error::ApiError;
use crate::repository;
use crate::state::AppState;

/// Request body for device-code issuance.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceCodeRequest {
    #[serde(default)]
    pub device_info: serde_json::Value,
}

/// Response for device-code issuance.
#[derive(Debug, Serialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: i64,
    pub interval: u64,
}

/// Request body for the token poll.
#[derive(Debug, Deserialize)]
pub struct DeviceTokenRequest {
    pub device_code: String,
}

/// Successful token exchange.
#[derive(Debug, Serialize)]
pub struct DeviceTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

/// Request body for CLI-side cancellation.
#[derive(Debug, Deserialize)]
pub struct DeviceCancelRequest {
    pub device_code: String,
}

/// Request body for browser-side approval or denial.
#[derive(Debug, Deserialize)]
pub struct DeviceDecisionRequest {
    pub user_code: String,
}

/// Build the unauthenticated device router (CLI-facing endpoints).
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device/code", post(request_code))
        .route("/device/token", post(poll_token))
        .route("/device/cancel", post(cancel))
}

/// Build the authenticated approval router (browser-facing endpoints).
pub fn approval_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/device/approve", post(approve))
        .route("/device/deny", post(deny))
}

/// `POST /v1/device/code` — start a device-flow session.
async fn request_code(
    State(state): State<Arc<AppState>>,
    body: Option<Json<DeviceCodeRequest>>,
) -> Result<Json<DeviceCodeResponse>, ApiError> {
    let Json(body) = body.unwrap_or_default();

    // Opportunistic cleanup keeps the table from accumulating dead rows.
    let purged = repository::purge_expired_sessions(&state.pool).await?;
    if purged > 0 {
        tracing::debug!(purged, "purged expired device sessions");
    }

    let device_code = device::generate_device_code();
    let user_code = device::generate_user_code();
    let expires_at = Utc::now() + Duration::seconds(DEVICE_CODE_TTL_SECS);

    repository::create_device_session(
        &state.pool,
        &device_code,
        &user_code,
        &body.device_info,
        expires_at,
    )
    .await?;

    Ok(Json(DeviceCodeResponse {
        device_code,
        user_code,
        verification_uri: state.config.verification_uri.clone(),
        expires_in: DEVICE_CODE_TTL_SECS,
        interval: POLL_INTERVAL_SECS,
    }))
}

/// `POST /v1/device/token` — poll for the session result.
///
/// The successful poll consumes the session; later polls for the same
/// device code see `invalid_device_code`.
async fn poll_token(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeviceTokenRequest>,
) -> Result<Json<DeviceTokenResponse>, ApiError> {
    if body.device_code.is_empty() {
        return Err(ApiError::BadRequest("device_code is required".to_owned()));
    }

    let Some(session) =
        repository::get_session_by_device_code(&state.pool, &body.device_code).await?
    else {
        return Err(ApiError::invalid_device_code());
    };

    let status: SessionStatus = session
        .status
        .parse()
        .map_err(|e: String| ApiError::Internal(format!("corrupt device session: {e}")))?;

    match device::decide_poll(status, session.user_id, session.expires_at, Utc::now()) {
        PollDecision::Pending => Err(ApiError::authorization_pending()),
        PollDecision::Expired => Err(ApiError::expired_device_code()),
        PollDecision::Denied => Err(ApiError::access_denied()),
        PollDecision::Approved { user_id } => {
            // Single-use: whoever deletes the approved row wins; everyone
            // else is told the code no longer exists.
            let Some(consumed) =
                repository::consume_approved_session(&state.pool, &body.device_code).await?
            else {
                return Err(ApiError::invalid_device_code());
            };

            let hostname = device_hostname(&consumed.device_info);

            let access_token = token::generate_token(TokenKind::Access);
            repository::upsert_personal_token(
                &state.pool,
                user_id,
                &format!("cli-access ({hostname})"),
                &token::hash_token(&access_token),
                "access",
                Utc::now() + Duration::seconds(ACCESS_TOKEN_TTL_SECS),
                &consumed.device_info,
            )
            .await?;

            let refresh_token = token::generate_token(TokenKind::Refresh);
            repository::upsert_personal_token(
                &state.pool,
                user_id,
                &format!("cli-refresh ({hostname})"),
                &token::hash_token(&refresh_token),
                "refresh",
                Utc::now() + Duration::seconds(REFRESH_TOKEN_TTL_SECS),
                &consumed.device_info,
            )
            .await?;

            tracing::info!(user_id = %user_id, hostname = %hostname, "device flow completed");

            Ok(Json(DeviceTokenResponse {
                access_token,
                refresh_token,
                expires_in: ACCESS_TOKEN_TTL_SECS,
                token_type: "Bearer",
            }))
        }
    }
}

/// `POST /v1/device/cancel` — CLI-side abort; deletes the session.
async fn cancel(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeviceCancelRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.device_code.is_empty() {
        return Err(ApiError::BadRequest("device_code is required".to_owned()));
    }

    repository::delete_session(&state.pool, &body.device_code).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /v1/device/approve` — bind the session to the approving user.
async fn approve(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Json(body): Json<DeviceDecisionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = identity.require_user()?;
    let session = pending_session_for_code(&state, &body.user_code).await?;

    repository::approve_session(&state.pool, &session.device_code, user_id).await?;

    tracing::info!(
        user_id = %user_id,
        hostname = %device_hostname(&session.device_info),
        "device code approved"
    );

    Ok(Json(serde_json::json!({ "ok": true })))
}

/// `POST /v1/device/deny` — reject the session.
async fn deny(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Json(body): Json<DeviceDecisionRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    identity.require_user()?;
    let session = pending_session_for_code(&state, &body.user_code).await?;

    repository::deny_session(&state.pool, &session.device_code).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Look up a live pending session by user code, normalizing case and
/// rejecting malformed or expired codes with one opaque error.
async fn pending_session_for_code(
    state: &AppState,
    user_code: &str,
) -> Result<crate::models::DeviceFlowSession, ApiError> {
    let normalized = user_code.trim().to_uppercase();
    if !device::user_code_format_is_valid(&normalized) {
        return Err(ApiError::BadRequest(
            "invalid code format, expected XXXX-XXXX".to_owned(),
        ));
    }

    let session = repository::get_pending_session_by_user_code(&state.pool, &normalized)
        .await?
        .ok_or_else(|| ApiError::NotFound("invalid or expired code".to_owned()))?;

    if Utc::now() > session.expires_at {
        return Err(ApiError::NotFound("invalid or expired code".to_owned()));
    }

    Ok(session)
}

/// Best-effort hostname out of the CLI-supplied device info.
fn device_hostname(device_info: &serde_json::Value) -> String {
    device_info
        .get("hostname")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown-device")
        .to_owned()
}
