// handlers/auth.rs - POST /api/login and GET /api/user/info

use axum::extract::{rejection::JsonRejection, Extension, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::database::models::User;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, Identity};

/// Same message for unknown user and wrong password
const BAD_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// A principal as shown to clients, with role name and granted codes
#[derive(Debug, Serialize)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub role_id: i64,
    pub role_name: String,
    pub permissions: Vec<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    /// Token lifetime in seconds
    pub expires_in: i64,
    pub user: Profile,
}

pub(crate) async fn load_profile(state: &AppState, user: User) -> Result<Profile, ApiError> {
    let role_name = state
        .store
        .find_role(user.role_id)
        .await?
        .map(|role| role.name)
        .unwrap_or_default();
    let permissions = state.evaluator.granted_codes(&user).await?;

    Ok(Profile {
        id: user.id,
        username: user.username,
        role_id: user.role_id,
        role_name,
        permissions,
        active: user.active,
        created_at: user.created_at,
        updated_at: user.updated_at,
    })
}

/// POST /api/login - Exchange credentials for a session token
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(request) = payload?;
    if request.username.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::bad_request("Username and password are required"));
    }

    let Some(user) = state.store.find_user_by_username(&request.username).await? else {
        // Same bcrypt work as a wrong password, so timing does not reveal
        // which usernames exist
        state.hasher.verify_decoy(&request.password).await?;
        tracing::warn!("Login failed: unknown user '{}'", request.username);
        return Err(ApiError::unauthenticated(BAD_CREDENTIALS));
    };

    if !state.hasher.verify(&request.password, &user.password_hash).await? {
        tracing::warn!("Login failed: wrong password for '{}'", user.username);
        return Err(ApiError::unauthenticated(BAD_CREDENTIALS));
    }

    if !user.active {
        tracing::warn!("Login refused: '{}' is disabled", user.username);
        return Err(ApiError::account_disabled("User account is disabled"));
    }

    let token = state.tokens.issue(&user.username)?;
    tracing::info!("User '{}' logged in", user.username);

    Ok(ApiResponse::success(LoginResponse {
        token,
        expires_in: state.tokens.lifetime_secs(),
        user: load_profile(&state, user).await?,
    }))
}

/// GET /api/user/info - The authenticated principal's own profile
pub async fn user_info(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> ApiResult<Profile> {
    let user = state
        .store
        .find_user_by_username(&identity.username)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("User does not exist"))?;

    Ok(ApiResponse::success(load_profile(&state, user).await?))
}
