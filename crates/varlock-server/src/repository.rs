//! Repository — PostgreSQL queries for all Varlock entities.
//!
//! Every function takes a `&PgPool` and returns `Result<T, ApiError>`.
//! Queries use parameterized statements (sqlx) — no SQL injection risk.
//! Secret values arrive here already encrypted; this layer never sees
//! plaintext.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{
    DeviceFlowSession, EncryptionKeyRow, PersonalAccessToken, Project, ProjectEnvironment,
    ProjectMember, SecretRow, SecretShare, ServiceToken,
};

/// Environments seeded into every new project. The first is the default.
const DEFAULT_ENVIRONMENTS: [(&str, &str); 3] = [
    ("Development", "development"),
    ("Preview", "preview"),
    ("Production", "production"),
];

// ── Projects ─────────────────────────────────────────────────────────

/// Create a new project owned by `owner_id`, seeding the default
/// environments in the same transaction.
///
/// # Errors
///
/// Returns `ApiError::Conflict` if the slug is already taken.
pub async fn create_project(
    pool: &PgPool,
    owner_id: Uuid,
    name: &str,
    slug: &str,
) -> Result<Project, ApiError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let project = sqlx::query_as::<_, Project>(
        r"INSERT INTO projects (owner_id, name, slug, ui_mode, default_environment_slug)
          VALUES ($1, $2, $3, 'simple', 'development')
          RETURNING *",
    )
    .bind(owner_id)
    .bind(name)
    .bind(slug)
    .fetch_one(&mut *tx)
    .await?;

    for (i, (env_name, env_slug)) in DEFAULT_ENVIRONMENTS.into_iter().enumerate() {
        sqlx::query(
            r"INSERT INTO project_environments (project_id, slug, name, is_default)
              VALUES ($1, $2, $3, $4)",
        )
        .bind(project.id)
        .bind(env_slug)
        .bind(env_name)
        .bind(i == 0)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(project)
}

/// Get a project by ID.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the project does not exist.
pub async fn get_project(pool: &PgPool, project_id: Uuid) -> Result<Project, ApiError> {
    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
        .bind(project_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("project not found".to_owned()))
}

/// List projects the user owns or is a member of.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_projects_for_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<Project>, ApiError> {
    let projects = sqlx::query_as::<_, Project>(
        r"SELECT p.* FROM projects p
          WHERE p.owner_id = $1
          UNION
          SELECT p.* FROM projects p
          JOIN project_members m ON m.project_id = p.id
          WHERE m.user_id = $1
          ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(projects)
}

/// Update project settings (rename, UI mode, default environment).
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the project does not exist.
pub async fn update_project(
    pool: &PgPool,
    project_id: Uuid,
    name: Option<&str>,
    ui_mode: Option<&str>,
    default_environment_slug: Option<&str>,
) -> Result<Project, ApiError> {
    sqlx::query_as::<_, Project>(
        r"UPDATE projects SET
            name = COALESCE($2, name),
            ui_mode = COALESCE($3, ui_mode),
            default_environment_slug = COALESCE($4, default_environment_slug),
            updated_at = now()
          WHERE id = $1
          RETURNING *",
    )
    .bind(project_id)
    .bind(name)
    .bind(ui_mode)
    .bind(default_environment_slug)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("project not found".to_owned()))
}

// ── Members ──────────────────────────────────────────────────────────

/// Add a member to a project.
///
/// # Errors
///
/// Returns `ApiError::Conflict` if the user is already a member.
pub async fn add_member(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
    role: &str,
) -> Result<ProjectMember, ApiError> {
    let member = sqlx::query_as::<_, ProjectMember>(
        r"INSERT INTO project_members (project_id, user_id, role)
          VALUES ($1, $2, $3)
          RETURNING *",
    )
    .bind(project_id)
    .bind(user_id)
    .bind(role)
    .fetch_one(pool)
    .await?;

    Ok(member)
}

/// List members of a project (the owner is not listed — derive it from the
/// project row).
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_members(pool: &PgPool, project_id: Uuid) -> Result<Vec<ProjectMember>, ApiError> {
    let members = sqlx::query_as::<_, ProjectMember>(
        "SELECT * FROM project_members WHERE project_id = $1 ORDER BY created_at",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(members)
}

/// Remove a member from a project.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if no such membership exists.
pub async fn remove_member(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM project_members WHERE project_id = $1 AND user_id = $2")
        .bind(project_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("membership not found".to_owned()));
    }

    Ok(())
}

/// The stored membership role for a user, if any.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn member_role(
    pool: &PgPool,
    project_id: Uuid,
    user_id: Uuid,
) -> Result<Option<String>, ApiError> {
    let role: Option<String> = sqlx::query_scalar(
        "SELECT role FROM project_members WHERE project_id = $1 AND user_id = $2",
    )
    .bind(project_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(role)
}

// ── Environments ─────────────────────────────────────────────────────

/// List environments for a project, default first.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_environments(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<ProjectEnvironment>, ApiError> {
    let envs = sqlx::query_as::<_, ProjectEnvironment>(
        r"SELECT * FROM project_environments
          WHERE project_id = $1
          ORDER BY is_default DESC, created_at",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(envs)
}

/// Resolve an environment by slug, or the project default when no slug is
/// requested.
///
/// # Errors
///
/// Returns `ApiError::NotFound` for an unknown slug or a project with no
/// environments.
pub async fn resolve_environment(
    pool: &PgPool,
    project_id: Uuid,
    requested_slug: Option<&str>,
) -> Result<ProjectEnvironment, ApiError> {
    let normalized = requested_slug
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    if let Some(slug) = normalized {
        return sqlx::query_as::<_, ProjectEnvironment>(
            "SELECT * FROM project_environments WHERE project_id = $1 AND slug = $2",
        )
        .bind(project_id)
        .bind(&slug)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("environment '{slug}' not found")));
    }

    sqlx::query_as::<_, ProjectEnvironment>(
        r"SELECT * FROM project_environments
          WHERE project_id = $1
          ORDER BY is_default DESC, created_at
          LIMIT 1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("no environments configured for project".to_owned()))
}

// ── Secrets ──────────────────────────────────────────────────────────

/// List all secrets in an environment.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_secrets(
    pool: &PgPool,
    environment_id: Uuid,
) -> Result<Vec<SecretRow>, ApiError> {
    let secrets = sqlx::query_as::<_, SecretRow>(
        "SELECT * FROM secrets WHERE environment_id = $1 ORDER BY key",
    )
    .bind(environment_id)
    .fetch_all(pool)
    .await?;

    Ok(secrets)
}

/// List the secrets in an environment that are individually shared with a
/// user. Used for callers holding no project-wide role.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_shared_secrets(
    pool: &PgPool,
    environment_id: Uuid,
    user_id: Uuid,
) -> Result<Vec<SecretRow>, ApiError> {
    let secrets = sqlx::query_as::<_, SecretRow>(
        r"SELECT s.* FROM secrets s
          JOIN secret_shares sh ON sh.secret_id = s.id
          WHERE s.environment_id = $1 AND sh.user_id = $2
          ORDER BY s.key",
    )
    .bind(environment_id)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(secrets)
}

/// Get a secret by ID.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the secret does not exist.
pub async fn get_secret(pool: &PgPool, secret_id: Uuid) -> Result<SecretRow, ApiError> {
    sqlx::query_as::<_, SecretRow>("SELECT * FROM secrets WHERE id = $1")
        .bind(secret_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("secret not found".to_owned()))
}

/// Upsert a secret (insert or replace by `(environment_id, key)`).
///
/// `value` must already be an envelope; `key_id` mirrors its embedded key
/// id for the scavenger. Normal edits and read-repair both rewrite `value`
/// in place; only normal edits go through here and update audit fields.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn upsert_secret(
    pool: &PgPool,
    project_id: Uuid,
    environment_id: Uuid,
    key: &str,
    value: &str,
    key_id: &str,
    actor_id: Uuid,
) -> Result<SecretRow, ApiError> {
    let secret = sqlx::query_as::<_, SecretRow>(
        r"INSERT INTO secrets (project_id, environment_id, key, value, key_id, creator_id, last_updated_by)
          VALUES ($1, $2, $3, $4, $5, $6, $6)
          ON CONFLICT (environment_id, key) DO UPDATE SET
            value = EXCLUDED.value,
            key_id = EXCLUDED.key_id,
            last_updated_by = EXCLUDED.last_updated_by,
            last_updated_at = now()
          RETURNING *",
    )
    .bind(project_id)
    .bind(environment_id)
    .bind(key)
    .bind(value)
    .bind(key_id)
    .bind(actor_id)
    .fetch_one(pool)
    .await?;

    Ok(secret)
}

/// Delete a secret by key within an environment.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the secret does not exist.
pub async fn delete_secret(
    pool: &PgPool,
    environment_id: Uuid,
    key: &str,
) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM secrets WHERE environment_id = $1 AND key = $2")
        .bind(environment_id)
        .bind(key)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("secret '{key}' not found")));
    }

    Ok(())
}

// ── Secret shares ────────────────────────────────────────────────────

/// Share a single secret with a user (viewer visibility only).
///
/// # Errors
///
/// Returns `ApiError::Conflict` if the share already exists.
pub async fn create_share(
    pool: &PgPool,
    secret_id: Uuid,
    user_id: Uuid,
) -> Result<SecretShare, ApiError> {
    let share = sqlx::query_as::<_, SecretShare>(
        r"INSERT INTO secret_shares (secret_id, user_id, role)
          VALUES ($1, $2, 'viewer')
          RETURNING *",
    )
    .bind(secret_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(share)
}

/// Revoke a per-secret share.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if no such share exists.
pub async fn delete_share(pool: &PgPool, secret_id: Uuid, user_id: Uuid) -> Result<(), ApiError> {
    let result = sqlx::query("DELETE FROM secret_shares WHERE secret_id = $1 AND user_id = $2")
        .bind(secret_id)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("share not found".to_owned()));
    }

    Ok(())
}

/// Whether a share row exists for exactly this secret and user.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn has_secret_share(
    pool: &PgPool,
    secret_id: Uuid,
    user_id: Uuid,
) -> Result<bool, ApiError> {
    let exists: Option<bool> = sqlx::query_scalar(
        "SELECT true FROM secret_shares WHERE secret_id = $1 AND user_id = $2",
    )
    .bind(secret_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(exists.is_some())
}

// ── Device-flow sessions ─────────────────────────────────────────────

/// Delete sessions past their TTL. Called opportunistically before
/// creating a new one.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn purge_expired_sessions(pool: &PgPool) -> Result<u64, ApiError> {
    let result = sqlx::query("DELETE FROM device_flow_sessions WHERE expires_at < now()")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Persist a new pending device-flow session.
///
/// # Errors
///
/// Returns `ApiError::Conflict` on a device/user code collision.
pub async fn create_device_session(
    pool: &PgPool,
    device_code: &str,
    user_code: &str,
    device_info: &serde_json::Value,
    expires_at: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        r"INSERT INTO device_flow_sessions (device_code, user_code, status, device_info, expires_at)
          VALUES ($1, $2, 'pending', $3, $4)",
    )
    .bind(device_code)
    .bind(user_code)
    .bind(device_info)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a session by its opaque device code.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn get_session_by_device_code(
    pool: &PgPool,
    device_code: &str,
) -> Result<Option<DeviceFlowSession>, ApiError> {
    let session = sqlx::query_as::<_, DeviceFlowSession>(
        "SELECT * FROM device_flow_sessions WHERE device_code = $1",
    )
    .bind(device_code)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Get a still-pending session by its human-readable user code.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn get_pending_session_by_user_code(
    pool: &PgPool,
    user_code: &str,
) -> Result<Option<DeviceFlowSession>, ApiError> {
    let session = sqlx::query_as::<_, DeviceFlowSession>(
        "SELECT * FROM device_flow_sessions WHERE user_code = $1 AND status = 'pending'",
    )
    .bind(user_code)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Mark a pending session approved and bind the approving user.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the session is gone or no longer pending.
pub async fn approve_session(
    pool: &PgPool,
    device_code: &str,
    user_id: Uuid,
) -> Result<(), ApiError> {
    let result = sqlx::query(
        r"UPDATE device_flow_sessions
          SET status = 'approved', user_id = $2
          WHERE device_code = $1 AND status = 'pending'",
    )
    .bind(device_code)
    .bind(user_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("device session not found".to_owned()));
    }

    Ok(())
}

/// Mark a pending session denied.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the session is gone or no longer pending.
pub async fn deny_session(pool: &PgPool, device_code: &str) -> Result<(), ApiError> {
    let result = sqlx::query(
        r"UPDATE device_flow_sessions
          SET status = 'denied'
          WHERE device_code = $1 AND status = 'pending'",
    )
    .bind(device_code)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("device session not found".to_owned()));
    }

    Ok(())
}

/// Atomically consume an approved session: the winning poll gets the row,
/// every later poll sees nothing. Single-use is enforced here, not by the
/// caller.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn consume_approved_session(
    pool: &PgPool,
    device_code: &str,
) -> Result<Option<DeviceFlowSession>, ApiError> {
    let session = sqlx::query_as::<_, DeviceFlowSession>(
        r"DELETE FROM device_flow_sessions
          WHERE device_code = $1 AND status = 'approved'
          RETURNING *",
    )
    .bind(device_code)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

/// Delete a session outright (CLI-initiated cancel).
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn delete_session(pool: &PgPool, device_code: &str) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM device_flow_sessions WHERE device_code = $1")
        .bind(device_code)
        .execute(pool)
        .await?;

    Ok(())
}

// ── Personal tokens ──────────────────────────────────────────────────

/// Upsert a personal token, replacing any prior token under the same
/// `(user_id, name)` — re-login from the same device never accumulates rows.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn upsert_personal_token(
    pool: &PgPool,
    user_id: Uuid,
    name: &str,
    token_hash: &str,
    kind: &str,
    expires_at: DateTime<Utc>,
    metadata: &serde_json::Value,
) -> Result<(), ApiError> {
    sqlx::query(
        r"INSERT INTO personal_access_tokens (user_id, name, token_hash, kind, expires_at, last_used_at, metadata)
          VALUES ($1, $2, $3, $4, $5, now(), $6)
          ON CONFLICT (user_id, name) DO UPDATE SET
            token_hash = EXCLUDED.token_hash,
            kind = EXCLUDED.kind,
            expires_at = EXCLUDED.expires_at,
            last_used_at = now(),
            metadata = EXCLUDED.metadata",
    )
    .bind(user_id)
    .bind(name)
    .bind(token_hash)
    .bind(kind)
    .bind(expires_at)
    .bind(metadata)
    .execute(pool)
    .await?;

    Ok(())
}

/// Look up a personal token by its SHA-256 hash.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn get_personal_token_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<PersonalAccessToken>, ApiError> {
    let token = sqlx::query_as::<_, PersonalAccessToken>(
        "SELECT * FROM personal_access_tokens WHERE token_hash = $1",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(token)
}

/// Update `last_used_at` for a personal token. Best-effort side effect.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn touch_personal_token(pool: &PgPool, token_hash: &str) -> Result<(), ApiError> {
    sqlx::query("UPDATE personal_access_tokens SET last_used_at = now() WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a personal token row by hash (revocation / logout).
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn delete_personal_token_by_hash(
    pool: &PgPool,
    token_hash: &str,
) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM personal_access_tokens WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

// ── Service tokens ───────────────────────────────────────────────────

/// Create a service token scoped to a project.
///
/// # Errors
///
/// Returns `ApiError::Conflict` if the name is already taken in the project.
#[allow(clippy::too_many_arguments)]
pub async fn create_service_token(
    pool: &PgPool,
    project_id: Uuid,
    name: &str,
    token_hash: &str,
    token_prefix: &str,
    permissions: &[String],
    expires_at: Option<DateTime<Utc>>,
    created_by: Uuid,
) -> Result<ServiceToken, ApiError> {
    let token = sqlx::query_as::<_, ServiceToken>(
        r"INSERT INTO service_tokens (project_id, name, token_hash, token_prefix, permissions, expires_at, created_by)
          VALUES ($1, $2, $3, $4, $5, $6, $7)
          RETURNING *",
    )
    .bind(project_id)
    .bind(name)
    .bind(token_hash)
    .bind(token_prefix)
    .bind(permissions)
    .bind(expires_at)
    .bind(created_by)
    .fetch_one(pool)
    .await?;

    Ok(token)
}

/// Look up a live (unrevoked, unexpired) service token by hash.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn lookup_service_token(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<ServiceToken>, ApiError> {
    let token = sqlx::query_as::<_, ServiceToken>(
        r"SELECT * FROM service_tokens
          WHERE token_hash = $1
            AND revoked_at IS NULL
            AND (expires_at IS NULL OR expires_at > now())",
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(token)
}

/// Update `last_used_at` for a service token. Best-effort side effect.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn touch_service_token(pool: &PgPool, token_id: Uuid) -> Result<(), ApiError> {
    sqlx::query("UPDATE service_tokens SET last_used_at = now() WHERE id = $1")
        .bind(token_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// List service tokens for a project.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn list_service_tokens(
    pool: &PgPool,
    project_id: Uuid,
) -> Result<Vec<ServiceToken>, ApiError> {
    let tokens = sqlx::query_as::<_, ServiceToken>(
        "SELECT * FROM service_tokens WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;

    Ok(tokens)
}

/// Revoke a service token.
///
/// # Errors
///
/// Returns `ApiError::NotFound` if the token does not exist in the project.
pub async fn revoke_service_token(
    pool: &PgPool,
    token_id: Uuid,
    project_id: Uuid,
) -> Result<(), ApiError> {
    let result = sqlx::query(
        "UPDATE service_tokens SET revoked_at = now() WHERE id = $1 AND project_id = $2",
    )
    .bind(token_id)
    .bind(project_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::NotFound("service token not found".to_owned()));
    }

    Ok(())
}

// ── Rotation (privileged) ────────────────────────────────────────────

/// Persist a rotated ciphertext. Privileged path: no authorization check,
/// unconditional single-row update, audit fields untouched — rotation never
/// changes ownership or authorship.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn rotate_secret(
    pool: &PgPool,
    secret_id: Uuid,
    new_value: &str,
    new_key_id: &str,
) -> Result<(), ApiError> {
    sqlx::query("UPDATE secrets SET value = $2, key_id = $3 WHERE id = $1")
        .bind(secret_id)
        .bind(new_value)
        .bind(new_key_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// A batch of secrets not encrypted under the active key (legacy rows have
/// `key_id IS NULL`). Feeds the scavenger.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn find_stale_secrets(
    pool: &PgPool,
    active_key_id: &str,
    limit: i64,
) -> Result<Vec<SecretRow>, ApiError> {
    let secrets = sqlx::query_as::<_, SecretRow>(
        r"SELECT * FROM secrets
          WHERE key_id IS DISTINCT FROM $1
          ORDER BY last_updated_at
          LIMIT $2",
    )
    .bind(active_key_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(secrets)
}

// ── Encryption keys ──────────────────────────────────────────────────

/// The active wrapped data key, if one exists.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn get_active_key_row(pool: &PgPool) -> Result<Option<EncryptionKeyRow>, ApiError> {
    let row = sqlx::query_as::<_, EncryptionKeyRow>(
        "SELECT * FROM encryption_keys WHERE status = 'active'",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// A wrapped data key by id.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn get_key_row(pool: &PgPool, key_id: &str) -> Result<Option<EncryptionKeyRow>, ApiError> {
    let row = sqlx::query_as::<_, EncryptionKeyRow>("SELECT * FROM encryption_keys WHERE id = $1")
        .bind(key_id)
        .fetch_optional(pool)
        .await?;

    Ok(row)
}

/// Insert a new wrapped data key as active, retiring every other key, in
/// one transaction.
///
/// # Errors
///
/// Returns `ApiError::Internal` on database failure.
pub async fn roll_key(pool: &PgPool, key_id: &str, encrypted_key: &str) -> Result<(), ApiError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    sqlx::query("UPDATE encryption_keys SET status = 'retired' WHERE status = 'active'")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r"INSERT INTO encryption_keys (id, encrypted_key, status)
          VALUES ($1, $2, 'active')",
    )
    .bind(key_id)
    .bind(encrypted_key)
    .execute(&mut *tx)
    .await?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(())
}
