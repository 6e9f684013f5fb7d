//! Database-backed authorization over the pure core resolver.
//!
//! Loads the minimal membership snapshot for one user (owner id + that
//! user's stored role, if any) and feeds it to
//! [`varlock_core::authz::RoleSnapshot`]. Per-secret grants are a separate
//! layer checked against `secret_shares` and never influence the project
//! role.

use sqlx::PgPool;
use uuid::Uuid;

use varlock_core::authz::{Role, RoleSnapshot};

use crate::error::ApiError;
use crate::repository;

/// Resolve a user's project role: owner (from the project row), stored
/// membership, or none.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the project does not exist.
pub async fn project_role(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Role>, ApiError> {
    let project = repository::get_project(pool, project_id).await?;

    let member = match repository::member_role(pool, project_id, user_id).await? {
        Some(stored) => {
            let role: Role = stored
                .parse()
                .map_err(|e: String| ApiError::Internal(format!("corrupt membership row: {e}")))?;
            vec![(user_id, role)]
        }
        None => Vec::new(),
    };

    let snapshot = RoleSnapshot {
        owner_id: project.owner_id,
        members: &member,
    };

    Ok(snapshot.resolve(user_id))
}

/// Resolve a role, failing when the user has none at all.
///
/// # Errors
///
/// Returns `ApiError::Forbidden` for users with no project-wide role.
pub async fn require_role(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<Role, ApiError> {
    project_role(pool, project_id, user_id)
        .await?
        .ok_or_else(|| ApiError::Forbidden("no access to this project".to_owned()))
}

/// Resolve a role and require write permission (owner or editor).
///
/// # Errors
///
/// Returns `ApiError::Forbidden` for viewers and strangers.
pub async fn require_write(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<Role, ApiError> {
    let role = require_role(pool, project_id, user_id).await?;
    if !role.can_write() {
        return Err(ApiError::Forbidden(
            "write access requires the owner or editor role".to_owned(),
        ));
    }
    Ok(role)
}

/// Whether the user can see exactly this one secret through a share row.
///
/// Scoped visibility only — a share never grants a project role and is
/// checked independently wherever single-secret sharing applies.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn has_secret_access(
    pool: &PgPool,
    secret_id: Uuid,
    user_id: Uuid,
) -> Result<bool, ApiError> {
    repository::has_secret_share(pool, secret_id, user_id).await
}
