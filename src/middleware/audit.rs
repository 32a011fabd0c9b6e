use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::Value;

use crate::config::AuditConfig;
use crate::database::models::NewAuditEntry;
use crate::database::Store;
use crate::error::ApiError;

use super::auth::Identity;

const ANONYMOUS: &str = "anonymous";
const MASK: &str = "******";

/// Writes exactly one audit entry per request that reaches it.
#[derive(Clone)]
pub struct AuditRecorder {
    store: Arc<dyn Store>,
    config: AuditConfig,
    max_request_bytes: usize,
}

impl AuditRecorder {
    pub fn new(store: Arc<dyn Store>, config: AuditConfig, max_request_bytes: usize) -> Self {
        Self {
            store,
            config,
            max_request_bytes,
        }
    }
}

/// Audit middleware. Buffers the request body and replays it downstream,
/// buffers the response body and rebuilds the response, then records the
/// entry before handing the response back. Recording failures are logged and
/// never change the response.
pub async fn audit_recorder(
    State(recorder): State<AuditRecorder>,
    request: Request,
    next: Next,
) -> Response {
    if !recorder.config.enabled {
        return next.run(request).await;
    }

    let action = request.method().to_string();
    let resource = request.uri().path().to_string();
    let ip = client_address(&request);
    let user_agent = header_str(request.headers(), header::USER_AGENT.as_str()).unwrap_or_default();

    let (parts, body) = request.into_parts();
    let (response, request_body) = match to_bytes(body, recorder.max_request_bytes).await {
        Ok(bytes) => {
            let snapshot = mask_passwords(&bytes);
            let request = Request::from_parts(parts, Body::from(bytes));
            (next.run(request).await, snapshot)
        }
        Err(e) => {
            tracing::warn!("Rejected request body for {} {}: {}", action, resource, e);
            let error = ApiError::bad_request(format!(
                "Request body exceeds {} bytes",
                recorder.max_request_bytes
            ));
            (error.into_response(), String::new())
        }
    };

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("Failed to buffer response body for {} {}: {}", action, resource, e);
            Bytes::new()
        }
    };

    let username = parts
        .extensions
        .get::<Identity>()
        .map(|identity| identity.username.clone())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    let entry = NewAuditEntry {
        username,
        action,
        resource,
        ip,
        user_agent,
        status: parts.status.as_u16() as i32,
        request_body,
        response: truncate_utf8(&String::from_utf8_lossy(&bytes), recorder.config.max_response_snapshot_bytes),
    };

    if let Err(e) = recorder.store.insert_log(entry).await {
        tracing::error!("Failed to write audit entry: {}", e);
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Caller address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer.
fn client_address(request: &Request) -> String {
    let headers = request.headers();
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|s| !s.is_empty()) {
            return first.to_string();
        }
    }
    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Request body as stored in the audit log. JSON bodies have every
/// `password` field masked; anything else is stored as lossy UTF-8.
fn mask_passwords(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<Value>(bytes) {
        Ok(mut value) => {
            mask_value(&mut value);
            value.to_string()
        }
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

fn mask_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if key.eq_ignore_ascii_case("password") {
                    *field = Value::String(MASK.to_string());
                } else {
                    mask_value(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask_value),
        _ => {}
    }
}

/// At most `max` bytes, cut back to the nearest char boundary
fn truncate_utf8(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_fields_at_any_depth() {
        let masked = mask_passwords(br#"{"username":"admin","password":"admin123","nested":{"Password":"x"}}"#);
        let value: Value = serde_json::from_str(&masked).unwrap();
        assert_eq!(value["username"], "admin");
        assert_eq!(value["password"], MASK);
        assert_eq!(value["nested"]["Password"], MASK);
        assert!(!masked.contains("admin123"));
    }

    #[test]
    fn non_json_body_is_kept_verbatim() {
        assert_eq!(mask_passwords(b"plain text"), "plain text");
        assert_eq!(mask_passwords(b""), "");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_utf8("hello", 10), "hello");
        assert_eq!(truncate_utf8("hello", 3), "hel");
        // 'é' is two bytes; cutting at 2 would split it
        assert_eq!(truncate_utf8("aé", 2), "a");
        assert_eq!(truncate_utf8("aé", 0), "");
    }

    #[test]
    fn forwarded_for_wins_over_peer() {
        let mut request = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_address(&request), "203.0.113.9");

        let mut request = Request::builder().body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_address(&request), "127.0.0.1");

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_address(&request), "unknown");
    }
}
