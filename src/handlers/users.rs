// handlers/users.rs - /api/users

use axum::extract::{
    rejection::{JsonRejection, PathRejection, QueryRejection},
    Extension, Path, Query, State,
};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::is_super_admin;
use crate::database::models::{NewUser, UserListing};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, CurrentUser};
use crate::types::{Paged, Pagination};

use super::auth::{load_profile, Profile};

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role_id: i64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Absent fields are left unchanged. Usernames are immutable.
#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub password: Option<String>,
    pub role_id: Option<i64>,
    pub active: Option<bool>,
}

/// GET /api/users - Paginated user list with role names
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<Pagination>, QueryRejection>,
) -> ApiResult<Paged<UserListing>> {
    let Query(pagination) = query?;
    let page = state.page(&pagination);
    let (users, total) = state.store.list_users(page).await?;
    Ok(ApiResponse::success(Paged::new(users, total, page)))
}

/// GET /api/users/:id - One user with role name and permission codes
pub async fn show(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Profile> {
    let Path(id) = path?;
    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", id)))?;
    Ok(ApiResponse::success(load_profile(&state, user).await?))
}

/// POST /api/users - Create a user with a hashed password
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<Profile> {
    let Json(request) = payload?;
    let username = request.username.trim();
    if username.is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    if state.store.find_user_by_username(username).await?.is_some() {
        return Err(ApiError::policy(format!("Username '{}' already exists", username)));
    }
    if state.store.find_role(request.role_id).await?.is_none() {
        return Err(ApiError::policy(format!("Role {} does not exist", request.role_id)));
    }

    let password_hash = state.hasher.hash(&request.password).await?;
    let user = state
        .store
        .create_user(NewUser {
            username: username.to_string(),
            password_hash,
            role_id: request.role_id,
            active: request.active,
        })
        .await?;

    tracing::info!("Created user '{}' with role {}", user.username, user.role_id);
    Ok(ApiResponse::created(load_profile(&state, user).await?))
}

/// PUT /api/users/:id - Change password, role or active flag
pub async fn update(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Profile> {
    let Path(id) = path?;
    let Json(request) = payload?;

    let mut user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", id)))?;

    if let Some(password) = request.password.filter(|p| !p.is_empty()) {
        user.password_hash = state.hasher.hash(&password).await?;
    }
    if let Some(role_id) = request.role_id {
        if state.store.find_role(role_id).await?.is_none() {
            return Err(ApiError::policy(format!("Role {} does not exist", role_id)));
        }
        user.role_id = role_id;
    }
    if let Some(active) = request.active {
        user.active = active;
    }

    let user = state.store.update_user(&user).await?;
    Ok(ApiResponse::success(load_profile(&state, user).await?))
}

/// DELETE /api/users/:id - Remove a user. Super administrators and the
/// caller themselves cannot be deleted.
pub async fn delete(
    State(state): State<AppState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;

    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {} not found", id)))?;

    if is_super_admin(user.role_id) {
        return Err(ApiError::policy("Super administrators cannot be deleted"));
    }
    if user.id == actor.id {
        return Err(ApiError::policy("You cannot delete your own account"));
    }

    if !state.store.delete_user(id).await? {
        return Err(ApiError::not_found(format!("User {} not found", id)));
    }

    tracing::info!("User '{}' deleted by '{}'", user.username, actor.username);
    Ok(ApiResponse::success(json!({ "id": id, "deleted": true })))
}
