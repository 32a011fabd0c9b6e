use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::auth::PermissionEvaluator;
use crate::database::models::User;
use crate::error::ApiError;

use super::auth::Identity;

/// Principal loaded and checked by the authorization gate
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// State of one authorization gate instance: the evaluator plus the code
/// this endpoint requires.
#[derive(Clone)]
pub struct PermissionGuard {
    evaluator: PermissionEvaluator,
    code: &'static str,
}

impl PermissionGuard {
    pub fn new(evaluator: PermissionEvaluator, code: &'static str) -> Self {
        Self { evaluator, code }
    }
}

/// Per-endpoint permission gate. Runs after [`super::authentication_gate`];
/// re-reads the principal and its grants on every request.
pub async fn authorization_gate(
    State(guard): State<PermissionGuard>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = request
        .extensions()
        .get::<Identity>()
        .cloned()
        .ok_or_else(|| ApiError::unauthenticated("Authentication required"))?;

    let user = guard
        .evaluator
        .authorize(&identity.username, guard.code)
        .await
        .map_err(|e| {
            tracing::warn!("Authorization denied for '{}' on {}: {}", identity.username, guard.code, e);
            ApiError::from(e)
        })?;

    tracing::debug!("'{}' authorized for {}", user.username, guard.code);
    request.extensions_mut().insert(CurrentUser(user));

    Ok(next.run(request).await)
}
