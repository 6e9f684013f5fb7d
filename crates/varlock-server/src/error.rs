//! HTTP error types for the Varlock server.
//!
//! Maps domain errors into HTTP responses. Every error variant produces a
//! JSON body with a machine-readable `error` field and a human-readable
//! `message`. Device-flow errors use the OAuth wire strings
//! (`authorization_pending`, `expired_token`, ...) and omit the message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use varlock_core::error::{CryptoError, IntegrityError, KeyRegistryError};

/// Application-level error returned from HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Authentication failed: missing, invalid, or expired credential.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but the role is insufficient for this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Client sent invalid input (field-level message).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unique-constraint violation (duplicate slug, token name, share, ...).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request failed the integrity perimeter (stale timestamp or bad
    /// signature).
    #[error("replay rejected: {0}")]
    Replay(String),

    /// Encryption failed on the write path. (Read-path decrypt failures are
    /// swallowed, never surfaced as this.)
    #[error("crypto error: {0}")]
    Crypto(String),

    /// OAuth-style protocol error carried verbatim on the wire
    /// (`authorization_pending`, `expired_token`, ...).
    #[error("protocol: {code}")]
    Protocol {
        code: &'static str,
        status: StatusCode,
    },

    /// Internal error (database, key store, ...).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// `400 {"error": "invalid_device_code"}`
    #[must_use]
    pub const fn invalid_device_code() -> Self {
        Self::Protocol {
            code: "invalid_device_code",
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// `400 {"error": "expired_token"}`
    #[must_use]
    pub const fn expired_device_code() -> Self {
        Self::Protocol {
            code: "expired_token",
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// `400 {"error": "authorization_pending"}`
    #[must_use]
    pub const fn authorization_pending() -> Self {
        Self::Protocol {
            code: "authorization_pending",
            status: StatusCode::BAD_REQUEST,
        }
    }

    /// `403 {"error": "access_denied"}`
    #[must_use]
    pub const fn access_denied() -> Self {
        Self::Protocol {
            code: "access_denied",
            status: StatusCode::FORBIDDEN,
        }
    }

    /// `401 {"error": "refresh_token_expired"}`
    #[must_use]
    pub const fn refresh_token_expired() -> Self {
        Self::Protocol {
            code: "refresh_token_expired",
            status: StatusCode::UNAUTHORIZED,
        }
    }

    /// `401 {"error": "invalid or revoked"}`
    #[must_use]
    pub const fn invalid_or_revoked_refresh() -> Self {
        Self::Protocol {
            code: "invalid or revoked",
            status: StatusCode::UNAUTHORIZED,
        }
    }
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", Some(msg)),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", Some(msg)),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg)),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", Some(msg)),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", Some(msg)),
            Self::Replay(msg) => (StatusCode::UNAUTHORIZED, "replay_rejected", Some(msg)),
            Self::Crypto(msg) => {
                tracing::error!(error = %msg, "write-path crypto error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "crypto_error",
                    Some("encryption failed".to_owned()),
                )
            }
            Self::Protocol { code, status } => (status, code, None),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    Some("internal server error".to_owned()),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("resource not found".to_owned()),
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation
                if db_err.code().as_deref() == Some("23505") {
                    Self::Conflict("resource already exists".to_owned())
                } else {
                    Self::Internal(format!("database error: {db_err}"))
                }
            }
            _ => Self::Internal(format!("database error: {err}")),
        }
    }
}

impl From<KeyRegistryError> for ApiError {
    fn from(err: KeyRegistryError) -> Self {
        match err {
            // Fatal for writers: encrypting requires an active key.
            KeyRegistryError::NoActiveKey => {
                Self::Internal("no active encryption key configured".to_owned())
            }
            KeyRegistryError::UnknownKey { .. } | KeyRegistryError::Unavailable { .. } => {
                Self::Internal(err.to_string())
            }
        }
    }
}

impl From<CryptoError> for ApiError {
    fn from(err: CryptoError) -> Self {
        Self::Crypto(err.to_string())
    }
}

impl From<IntegrityError> for ApiError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::MissingHeader { .. } | IntegrityError::MalformedTimestamp => {
                Self::BadRequest(err.to_string())
            }
            IntegrityError::Replay { .. } | IntegrityError::BadSignature => {
                Self::Replay(err.to_string())
            }
        }
    }
}
