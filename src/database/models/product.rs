use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Product aggregate. Images and specs are owned children, loaded separately
/// and always ordered by `sort` then `id`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub title: String,
    pub description: String,
    /// 1 = listed, 0 = delisted
    pub status: i32,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[sqlx(skip)]
    pub images: Vec<ProductImage>,
    #[sqlx(skip)]
    pub specs: Vec<ProductSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProductImage {
    pub id: i64,
    pub product_id: i64,
    pub url: String,
    pub sort: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProductSpec {
    pub id: i64,
    pub product_id: i64,
    pub name: String,
    pub value: String,
    pub sort: i32,
}

/// Scalar product fields written on create and update
#[derive(Debug, Clone)]
pub struct ProductFields {
    pub title: String,
    pub description: String,
    pub status: i32,
}

/// Image to insert. Carries no identifier: children are always fresh rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewImage {
    pub url: String,
    pub sort: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSpec {
    pub name: String,
    pub value: String,
    pub sort: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ProductQuery {
    /// Case-insensitive substring match on the title
    pub title: Option<String>,
    pub status: Option<i32>,
}
