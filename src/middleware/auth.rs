use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};

use crate::auth::TokenService;
use crate::error::ApiError;

/// Identity bound to a request once its bearer token verifies
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

/// Bearer token authentication gate.
///
/// Rejects before anything downstream runs. On success the identity goes into
/// the request extensions for handlers, and is copied onto the response so
/// outer layers (the audit recorder) can attribute the request.
pub async fn authentication_gate(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(request.headers()).map_err(|msg| {
        tracing::warn!("Authentication failed for {}: {}", request.uri().path(), msg);
        ApiError::unauthenticated(msg)
    })?;

    let claims = tokens.verify(&token).map_err(|e| {
        tracing::warn!("Authentication failed for {}: {}", request.uri().path(), e);
        ApiError::from(e)
    })?;

    let identity = Identity { username: claims.username };
    request.extensions_mut().insert(identity.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(identity);
    Ok(response)
}

/// Extract the token from `Authorization: Bearer <token>`. The prefix is
/// matched case-sensitively.
fn extract_bearer(headers: &HeaderMap) -> Result<String, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("Missing Authorization header")?
        .to_str()
        .map_err(|_| "Invalid Authorization header format")?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or("Authorization header must use Bearer token format")?;

    if token.trim().is_empty() {
        return Err("Empty bearer token");
    }
    Ok(token.to_string())
}
