use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A principal. The credential hash never leaves the server.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role_id: i64,
    pub active: bool,
}

/// User row joined with its role name for listings
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserListing {
    pub id: i64,
    pub username: String,
    pub role_id: i64,
    pub role_name: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
