use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Immutable record of one gated request
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub username: String,
    pub action: String,
    pub resource: String,
    pub ip: String,
    pub user_agent: String,
    pub status: i32,
    pub request_body: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub username: String,
    pub action: String,
    pub resource: String,
    pub ip: String,
    pub user_agent: String,
    pub status: i32,
    pub request_body: String,
    pub response: String,
}

#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub username: Option<String>,
    pub action: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ActionCount {
    pub action: String,
    pub count: i64,
}
