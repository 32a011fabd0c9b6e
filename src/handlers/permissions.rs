// handlers/permissions.rs - /api/permissions

use std::collections::BTreeMap;

use axum::extract::{
    rejection::{JsonRejection, PathRejection},
    Path, State,
};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::auth::permissions::{group_by_module, validate_code};
use crate::database::models::{NewPermission, Permission};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};

#[derive(Debug, Serialize)]
pub struct PermissionCatalog {
    /// Ordered by code
    pub permissions: Vec<Permission>,
    /// Same permissions keyed by module (the part of the code before `:`)
    pub modules: BTreeMap<String, Vec<Permission>>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
}

async fn ensure_code_free(state: &AppState, code: &str, own_id: Option<i64>) -> Result<(), ApiError> {
    match state.store.find_permission_by_code(code).await? {
        Some(existing) if Some(existing.id) != own_id => {
            Err(ApiError::policy(format!("Permission code '{}' already exists", code)))
        }
        _ => Ok(()),
    }
}

/// GET /api/permissions - Catalog, flat and grouped by module
pub async fn list(State(state): State<AppState>) -> ApiResult<PermissionCatalog> {
    let permissions = state.store.list_permissions().await?;
    let modules = group_by_module(permissions.clone());
    Ok(ApiResponse::success(PermissionCatalog { permissions, modules }))
}

/// POST /api/permissions
pub async fn create(
    State(state): State<AppState>,
    payload: Result<Json<CreatePermissionRequest>, JsonRejection>,
) -> ApiResult<Permission> {
    let Json(request) = payload?;
    let name = request.name.trim().to_string();
    let code = request.code.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Permission name is required"));
    }
    validate_code(&code)?;
    ensure_code_free(&state, &code, None).await?;

    let permission = state
        .store
        .create_permission(NewPermission {
            name,
            description: request.description,
            code,
        })
        .await?;

    tracing::info!("Created permission '{}'", permission.code);
    Ok(ApiResponse::created(permission))
}

/// PUT /api/permissions/:id
pub async fn update(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<UpdatePermissionRequest>, JsonRejection>,
) -> ApiResult<Permission> {
    let Path(id) = path?;
    let Json(request) = payload?;

    let mut permission = state
        .store
        .find_permission(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Permission {} not found", id)))?;

    if let Some(code) = request.code.map(|c| c.trim().to_string()) {
        validate_code(&code)?;
        if code != permission.code {
            ensure_code_free(&state, &code, Some(id)).await?;
        }
        permission.code = code;
    }
    if let Some(name) = request.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
        permission.name = name;
    }
    if let Some(description) = request.description {
        permission.description = description;
    }

    let permission = state.store.update_permission(&permission).await?;
    Ok(ApiResponse::success(permission))
}

/// DELETE /api/permissions/:id - Refused while any role grants it
pub async fn delete(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;

    let permission = state
        .store
        .find_permission(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Permission {} not found", id)))?;

    let grants = state.store.count_grants_for_permission(id).await?;
    if grants > 0 {
        return Err(ApiError::conflict(format!(
            "Permission '{}' is granted to {} role(s)",
            permission.code, grants
        )));
    }

    if !state.store.delete_permission(id).await? {
        return Err(ApiError::not_found(format!("Permission {} not found", id)));
    }

    tracing::info!("Deleted permission '{}'", permission.code);
    Ok(ApiResponse::success(json!({ "id": id, "deleted": true })))
}
