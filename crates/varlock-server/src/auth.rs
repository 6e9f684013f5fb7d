//! Bearer authentication — personal and service token validation.
//!
//! Every authenticated route receives an [`AuthIdentity`] injected by
//! [`auth_middleware`]. The token prefix routes the lookup to one of two
//! disjoint stores:
//!
//! - `vlk_st_` → **service** identity: tied directly to one project, no
//!   user, bypasses per-user role resolution entirely.
//! - anything else → **personal** identity: a user subject to full role
//!   resolution. Only `access`-kind tokens authenticate API calls; refresh
//!   tokens are exchanged at `/v1/auth/refresh`, never presented as bearers.
//!
//! Tokens are SHA-256 hashed before lookup (never stored plaintext) and
//! `last_used_at` is touched as a best-effort background side effect.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use uuid::Uuid;

use varlock_core::token::{self, LookupStore};

use crate::error::ApiError;
use crate::repository;
use crate::state::AppState;

/// Identity of the authenticated caller.
#[derive(Debug, Clone)]
pub enum AuthIdentity {
    /// A user authenticated with a personal access token.
    User {
        user_id: Uuid,
        /// Token name (`cli-access (hostname)`), used for revocation.
        token_name: String,
        /// Hash of the presenting token.
        token_hash: String,
    },
    /// A CI/CD or runtime client authenticated with a service token.
    Service {
        token_id: Uuid,
        project_id: Uuid,
        permissions: Vec<String>,
    },
}

impl AuthIdentity {
    /// The user behind this identity, if it is a personal one.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { user_id, .. } => Some(*user_id),
            Self::Service { .. } => None,
        }
    }

    /// Require a personal identity (used by endpoints that only make sense
    /// for humans — device approval, token management).
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Forbidden` for service identities.
    pub fn require_user(&self) -> Result<Uuid, ApiError> {
        self.user_id().ok_or_else(|| {
            ApiError::Forbidden("this operation requires a user identity".to_owned())
        })
    }
}

/// Validate a bearer token and resolve its identity.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` for unknown tokens and
/// expired tokens (`token_expired` semantics collapse into unauthorized at
/// the HTTP layer, with distinct messages).
pub async fn validate_token(state: &AppState, bearer: &str) -> Result<AuthIdentity, ApiError> {
    let token_hash = token::hash_token(bearer);

    match token::lookup_store(bearer) {
        LookupStore::Service => {
            let Some(st) = repository::lookup_service_token(&state.pool, &token_hash).await? else {
                return Err(ApiError::Unauthorized(
                    "invalid or revoked service token".to_owned(),
                ));
            };

            // Touch last_used_at in the background; failures only logged.
            let pool = state.pool.clone();
            let token_id = st.id;
            tokio::spawn(async move {
                if let Err(e) = repository::touch_service_token(&pool, token_id).await {
                    tracing::warn!(error = %e, "failed to touch service token");
                }
            });

            Ok(AuthIdentity::Service {
                token_id: st.id,
                project_id: st.project_id,
                permissions: st.permissions,
            })
        }
        LookupStore::Personal => {
            let Some(pat) = repository::get_personal_token_by_hash(&state.pool, &token_hash).await?
            else {
                return Err(ApiError::Unauthorized("invalid token".to_owned()));
            };

            if pat.kind != "access" {
                // Refresh tokens are exchange-only credentials.
                return Err(ApiError::Unauthorized(
                    "token cannot be used as a bearer credential".to_owned(),
                ));
            }

            if let Some(expires_at) = pat.expires_at {
                if Utc::now() > expires_at {
                    return Err(ApiError::Unauthorized("token expired".to_owned()));
                }
            }

            let pool = state.pool.clone();
            let hash = token_hash.clone();
            tokio::spawn(async move {
                if let Err(e) = repository::touch_personal_token(&pool, &hash).await {
                    tracing::warn!(error = %e, "failed to touch personal token");
                }
            });

            Ok(AuthIdentity::User {
                user_id: pat.user_id,
                token_name: pat.name,
                token_hash,
            })
        }
    }
}

/// Axum middleware that authenticates requests from the
/// `Authorization: Bearer <token>` header.
///
/// Injects [`AuthIdentity`] into request extensions on success.
///
/// # Errors
///
/// Returns `ApiError::Unauthorized` if the header is missing, malformed,
/// or carries an invalid/expired token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let Some(header) = auth_header else {
        return Err(ApiError::Unauthorized(
            "missing Authorization header".to_owned(),
        ));
    };

    let bearer = header.strip_prefix("Bearer ").ok_or_else(|| {
        ApiError::Unauthorized("Authorization header must use Bearer scheme".to_owned())
    })?;

    let identity = validate_token(&state, bearer).await?;
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
