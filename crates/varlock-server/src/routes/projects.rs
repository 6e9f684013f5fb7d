//! Project management routes — creation, listing, role query, settings,
//! environments, and members.
//!
//! Mutations require write permission (owner or editor). The role query
//! returns the resolved role with its permission set and the project's
//! default environment, which is what the CLI needs to decide what it may
//! do before trying.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use varlock_core::authz::{Permission, Role};

use crate::auth::AuthIdentity;
use crate::authz;
use crate::error::ApiError;
use crate::models::{Project, ProjectEnvironment, ProjectMember};
use crate::repository;
use crate::state::AppState;

/// Request body for project creation.
#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub slug: Option<String>,
}

/// Request body for project settings updates.
#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub ui_mode: Option<String>,
    pub default_environment_slug: Option<String>,
}

/// Request body for adding a member.
#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role: String,
}

/// Response for the role query.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResponse {
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub default_environment: String,
}

/// One environment in the listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentResponse {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub is_default: bool,
}

/// Response for project listing.
#[derive(Debug, Serialize)]
pub struct ProjectListResponse {
    pub projects: Vec<Project>,
}

/// Response for the member listing.
#[derive(Debug, Serialize)]
pub struct MemberListResponse {
    pub owner_id: Uuid,
    pub members: Vec<ProjectMember>,
}

/// Build the projects router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/projects", post(create_project).get(list_projects))
        .route("/projects/{project_id}", patch(update_project))
        .route("/projects/{project_id}/role", get(role_query))
        .route("/projects/{project_id}/environments", get(list_environments))
        .route(
            "/projects/{project_id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/projects/{project_id}/members/{user_id}",
            axum::routing::delete(remove_member),
        )
}

/// `POST /v1/projects` — create a project; the caller becomes its owner.
async fn create_project(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let user_id = identity.require_user()?;

    let name = body.name.trim();
    if name.is_empty() || name.len() > 50 {
        return Err(ApiError::BadRequest(
            "project name must be 1-50 characters".to_owned(),
        ));
    }

    let slug = match body.slug {
        Some(ref s) => s.trim().to_lowercase(),
        None => slugify(name),
    };
    if slug.is_empty() {
        return Err(ApiError::BadRequest(
            "project slug cannot be empty".to_owned(),
        ));
    }

    let project = repository::create_project(&state.pool, user_id, name, &slug).await?;
    tracing::info!(project_id = %project.id, slug = %project.slug, "project created");

    Ok(Json(project))
}

/// `GET /v1/projects` — list projects the caller owns or belongs to.
async fn list_projects(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
) -> Result<Json<ProjectListResponse>, ApiError> {
    let user_id = identity.require_user()?;
    let projects = repository::list_projects_for_user(&state.pool, user_id).await?;
    Ok(Json(ProjectListResponse { projects }))
}

/// `GET /v1/projects/{project_id}/role` — the caller's resolved role,
/// permission set, and the project's default environment.
async fn role_query(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<RoleResponse>, ApiError> {
    let user_id = identity.require_user()?;
    let role = authz::require_role(&state.pool, project_id, user_id).await?;
    let project = repository::get_project(&state.pool, project_id).await?;

    Ok(Json(RoleResponse {
        role,
        permissions: role.permissions().to_vec(),
        default_environment: project.default_environment_slug,
    }))
}

/// `GET /v1/projects/{project_id}/environments` — environments, default
/// first. Service tokens may list the project they are scoped to.
async fn list_environments(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match &identity {
        AuthIdentity::User { user_id, .. } => {
            authz::require_role(&state.pool, project_id, *user_id).await?;
        }
        AuthIdentity::Service {
            project_id: token_project,
            ..
        } => {
            if *token_project != project_id {
                return Err(ApiError::Forbidden(
                    "service token is not scoped to this project".to_owned(),
                ));
            }
        }
    }

    let environments = repository::list_environments(&state.pool, project_id)
        .await?
        .into_iter()
        .map(environment_response)
        .collect::<Vec<_>>();

    Ok(Json(serde_json::json!({ "environments": environments })))
}

/// `PATCH /v1/projects/{project_id}` — rename, switch UI mode, or change
/// the default environment.
async fn update_project(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_write(&state.pool, project_id, user_id).await?;

    if let Some(ref name) = body.name {
        let name = name.trim();
        if name.is_empty() || name.len() > 50 {
            return Err(ApiError::BadRequest(
                "project name must be 1-50 characters".to_owned(),
            ));
        }
    }

    if let Some(ref ui_mode) = body.ui_mode {
        if ui_mode != "simple" && ui_mode != "advanced" {
            return Err(ApiError::BadRequest(
                "ui_mode must be 'simple' or 'advanced'".to_owned(),
            ));
        }
    }

    // A new default environment must actually exist.
    if let Some(ref slug) = body.default_environment_slug {
        repository::resolve_environment(&state.pool, project_id, Some(slug)).await?;
    }

    let project = repository::update_project(
        &state.pool,
        project_id,
        body.name.as_deref().map(str::trim),
        body.ui_mode.as_deref(),
        body.default_environment_slug.as_deref(),
    )
    .await?;

    Ok(Json(project))
}

/// `GET /v1/projects/{project_id}/members` — owner id plus stored members.
async fn list_members(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<MemberListResponse>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_role(&state.pool, project_id, user_id).await?;

    let project = repository::get_project(&state.pool, project_id).await?;
    let members = repository::list_members(&state.pool, project_id).await?;

    Ok(Json(MemberListResponse {
        owner_id: project.owner_id,
        members,
    }))
}

/// `POST /v1/projects/{project_id}/members` — add an editor or viewer.
///
/// The owner is derived from the project row and can never be added as a
/// member.
async fn add_member(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path(project_id): Path<Uuid>,
    Json(body): Json<AddMemberRequest>,
) -> Result<Json<ProjectMember>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_write(&state.pool, project_id, user_id).await?;

    if body.role != "editor" && body.role != "viewer" {
        return Err(ApiError::BadRequest(
            "role must be 'editor' or 'viewer'".to_owned(),
        ));
    }

    let project = repository::get_project(&state.pool, project_id).await?;
    if body.user_id == project.owner_id {
        return Err(ApiError::Conflict(
            "the project owner cannot be added as a member".to_owned(),
        ));
    }

    let member = repository::add_member(&state.pool, project_id, body.user_id, &body.role).await?;
    Ok(Json(member))
}

/// `DELETE /v1/projects/{project_id}/members/{user_id}` — remove a member.
async fn remove_member(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<AuthIdentity>,
    Path((project_id, member_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user_id = identity.require_user()?;
    authz::require_write(&state.pool, project_id, user_id).await?;

    repository::remove_member(&state.pool, project_id, member_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

fn environment_response(env: ProjectEnvironment) -> EnvironmentResponse {
    EnvironmentResponse {
        id: env.id,
        slug: env.slug,
        name: env.name,
        is_default: env.is_default,
    }
}

/// Lowercase, alphanumerics and dashes only.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::slugify;

    #[test]
    fn slugify_basics() {
        assert_eq!(slugify("My API Keys"), "my-api-keys");
        assert_eq!(slugify("  spaced  out  "), "spaced-out");
        assert_eq!(slugify("already-slugged"), "already-slugged");
        assert_eq!(slugify("!!!"), "");
    }
}
