// handlers/roles.rs - /api/roles and /api/roles/:id/permissions

use axum::extract::{
    rejection::{JsonRejection, PathRejection},
    Path, State,
};
use axum::Json;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::is_super_admin;
use crate::database::associations::rollback_quietly;
use crate::database::models::{NewRole, Permission, Role, RoleWithPermissions};
use crate::database::{AssociationReplacer, Children, StoreError, StoreTx};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Initial grants, applied in the same transaction as the insert
    #[serde(default)]
    pub permission_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplacePermissionsRequest {
    pub permission_ids: Vec<i64>,
}

async fn find_role(state: &AppState, id: i64) -> Result<Role, ApiError> {
    state
        .store
        .find_role(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Role {} not found", id)))
}

fn refuse_super_admin(id: i64) -> Result<(), ApiError> {
    if is_super_admin(id) {
        return Err(ApiError::policy("The super administrator role cannot be modified or deleted"));
    }
    Ok(())
}

/// GET /api/roles - All roles with their granted permissions
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<RoleWithPermissions>> {
    let roles = state.store.list_roles().await?;
    let data = try_join_all(roles.into_iter().map(|role| {
        let store = state.store.clone();
        async move {
            let permissions = store.role_permissions(role.id).await?;
            Ok::<_, StoreError>(RoleWithPermissions { role, permissions })
        }
    }))
    .await?;
    Ok(ApiResponse::success(data))
}

async fn insert_role(
    tx: &mut dyn StoreTx,
    role: NewRole,
    grants: &Children,
) -> Result<Role, StoreError> {
    let role = tx.create_role(role).await?;
    AssociationReplacer::replace_within(tx, role.id, grants).await?;
    Ok(role)
}

/// POST /api/roles - Create a role, optionally with its initial grants
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<RoleWithPermissions> {
    let Json(request) = payload?;
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Role name is required"));
    }
    if state.store.find_role_by_name(&name).await?.is_some() {
        return Err(ApiError::policy(format!("Role name '{}' already exists", name)));
    }

    let mut tx = state.store.begin().await?;
    let created = insert_role(
        tx.as_mut(),
        NewRole {
            name,
            description: request.description,
        },
        &Children::Grants(request.permission_ids),
    )
    .await;

    let role = match created {
        Ok(role) => {
            tx.commit().await?;
            role
        }
        Err(e) => {
            rollback_quietly(tx).await;
            return Err(e.into());
        }
    };

    tracing::info!("Created role '{}' ({})", role.name, role.id);
    let permissions = state.store.role_permissions(role.id).await?;
    Ok(ApiResponse::created(RoleWithPermissions { role, permissions }))
}

/// PUT /api/roles/:id - Rename or re-describe a role
pub async fn update(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> ApiResult<Role> {
    let Path(id) = path?;
    refuse_super_admin(id)?;
    let Json(request) = payload?;

    let mut role = find_role(&state, id).await?;

    if let Some(name) = request.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        if name != role.name && state.store.find_role_by_name(&name).await?.is_some() {
            return Err(ApiError::policy(format!("Role name '{}' already exists", name)));
        }
        role.name = name;
    }
    if let Some(description) = request.description {
        role.description = description;
    }

    let role = state.store.update_role(&role).await?;
    Ok(ApiResponse::success(role))
}

/// DELETE /api/roles/:id - Refused while any user holds the role
pub async fn delete(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;
    refuse_super_admin(id)?;

    let role = find_role(&state, id).await?;
    let holders = state.store.count_users_with_role(id).await?;
    if holders > 0 {
        return Err(ApiError::conflict(format!(
            "Role '{}' is assigned to {} user(s)",
            role.name, holders
        )));
    }

    if !state.store.delete_role(id).await? {
        return Err(ApiError::not_found(format!("Role {} not found", id)));
    }

    tracing::info!("Deleted role '{}' ({})", role.name, id);
    Ok(ApiResponse::success(json!({ "id": id, "deleted": true })))
}

/// GET /api/roles/:id/permissions
pub async fn permissions(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Vec<Permission>> {
    let Path(id) = path?;
    find_role(&state, id).await?;
    Ok(ApiResponse::success(state.store.role_permissions(id).await?))
}

/// PUT /api/roles/:id/permissions - The role's grants become exactly
/// `permission_ids`; an empty list revokes everything.
pub async fn replace_permissions(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReplacePermissionsRequest>, JsonRejection>,
) -> ApiResult<Vec<Permission>> {
    let Path(id) = path?;
    let Json(request) = payload?;
    find_role(&state, id).await?;

    let granted = AssociationReplacer::replace(
        state.store.as_ref(),
        id,
        &Children::Grants(request.permission_ids),
    )
    .await?;

    tracing::info!("Role {} now has {} permission(s)", id, granted);
    Ok(ApiResponse::success(state.store.role_permissions(id).await?))
}
