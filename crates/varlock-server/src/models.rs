//! Domain models backed by PostgreSQL rows.
//!
//! Secret values are stored as envelope ciphertext strings — the decrypted
//! form only ever exists in memory as a [`SecretEntry`]. Token rows carry
//! hashes, never plaintext.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ── Projects ─────────────────────────────────────────────────────────

/// A project. The owner is implicit — derived from `owner_id`, never stored
/// in the membership table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub slug: String,
    pub ui_mode: String,
    pub default_environment_slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored project membership (`editor` / `viewer` only).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// ── Environments ─────────────────────────────────────────────────────

/// An environment within a project (development, preview, production, ...).
/// Exactly one per project is the default.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectEnvironment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

// ── Secrets ──────────────────────────────────────────────────────────

/// A stored secret. `value` is an envelope (`v1:<keyId>:<payload>`) or a
/// legacy payload — never plaintext. `key_id` mirrors the embedded key id
/// so the scavenger can find stale rows without parsing every value.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SecretRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub environment_id: Uuid,
    pub key: String,
    pub value: String,
    pub key_id: Option<String>,
    pub creator_id: Uuid,
    pub last_updated_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// A decrypted secret as returned to callers. Exists only in memory.
#[derive(Debug, Clone, Serialize)]
pub struct SecretEntry {
    pub id: Uuid,
    pub key: String,
    pub value: String,
    pub last_updated_by: Uuid,
    pub last_updated_at: DateTime<Utc>,
}

/// A per-secret share: grants one user visibility of exactly one secret.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SecretShare {
    pub secret_id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// ── Device flow ──────────────────────────────────────────────────────

/// A device-flow session. Single-use: deleted when the approved poll
/// exchanges it for tokens.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeviceFlowSession {
    pub device_code: String,
    pub user_code: String,
    pub status: String,
    pub user_id: Option<Uuid>,
    pub device_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ── Tokens ───────────────────────────────────────────────────────────

/// A personal access or refresh token row. Unique on `(user_id, name)` —
/// re-authenticating the same device replaces its prior token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PersonalAccessToken {
    pub user_id: Uuid,
    pub name: String,
    pub token_hash: String,
    pub kind: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A project-scoped service token.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ServiceToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    #[serde(skip)]
    pub token_hash: String,
    pub token_prefix: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

// ── Encryption keys ──────────────────────────────────────────────────

/// A wrapped data key. `encrypted_key` is the 32-byte key sealed under the
/// master key (base64 of `nonce || ciphertext || tag`). At most one row is
/// `active`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EncryptionKeyRow {
    pub id: String,
    pub encrypted_key: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
