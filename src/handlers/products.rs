// handlers/products.rs - /api/products
//
// Images and specs are owned by their product and replaced wholesale on
// every write. Child identifiers sent by clients are ignored.

use axum::extract::{
    rejection::{JsonRejection, PathRejection, QueryRejection},
    Extension, Path, Query, State,
};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::associations::rollback_quietly;
use crate::database::models::{NewImage, NewSpec, Product, ProductFields, ProductQuery};
use crate::database::{AssociationReplacer, Children, StoreError, StoreTx};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, CurrentUser};
use crate::types::{Paged, Pagination};

pub const STATUS_DELISTED: i32 = 0;
pub const STATUS_LISTED: i32 = 1;

#[derive(Debug, Deserialize)]
pub struct ProductListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub title: Option<String>,
    pub status: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct ImageInput {
    pub url: String,
    #[serde(default)]
    pub sort: i32,
}

#[derive(Debug, Deserialize)]
pub struct SpecInput {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub sort: i32,
}

/// Body of create and update. Missing `images`/`specs` mean "none".
#[derive(Debug, Deserialize)]
pub struct ProductPayload {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: i32,
    #[serde(default)]
    pub images: Vec<ImageInput>,
    #[serde(default)]
    pub specs: Vec<SpecInput>,
}

fn default_status() -> i32 {
    STATUS_LISTED
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: i32,
}

fn check_status(status: i32) -> Result<(), ApiError> {
    if status != STATUS_LISTED && status != STATUS_DELISTED {
        return Err(ApiError::bad_request(format!(
            "Product status must be {} or {}",
            STATUS_DELISTED, STATUS_LISTED
        )));
    }
    Ok(())
}

impl ProductPayload {
    fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::bad_request("Product title is required"));
        }
        if self.images.iter().any(|i| i.url.trim().is_empty()) {
            return Err(ApiError::bad_request("Image url is required"));
        }
        if self.specs.iter().any(|s| s.name.trim().is_empty()) {
            return Err(ApiError::bad_request("Spec name is required"));
        }
        check_status(self.status)
    }

    fn fields(&self) -> ProductFields {
        ProductFields {
            title: self.title.trim().to_string(),
            description: self.description.clone(),
            status: self.status,
        }
    }

    fn images(&self) -> Children {
        Children::Images(
            self.images
                .iter()
                .map(|i| NewImage { url: i.url.clone(), sort: i.sort })
                .collect(),
        )
    }

    fn specs(&self) -> Children {
        Children::Specs(
            self.specs
                .iter()
                .map(|s| NewSpec { name: s.name.clone(), value: s.value.clone(), sort: s.sort })
                .collect(),
        )
    }
}

/// Write the product row and both child collections on one transaction.
/// `id` of `None` creates.
async fn write_product(
    tx: &mut dyn StoreTx,
    id: Option<i64>,
    payload: &ProductPayload,
    actor: i64,
) -> Result<i64, StoreError> {
    let product = match id {
        Some(id) => tx.update_product(id, &payload.fields(), Some(actor)).await?,
        None => tx.create_product(&payload.fields(), Some(actor)).await?,
    };
    AssociationReplacer::replace_within(tx, product.id, &payload.images()).await?;
    AssociationReplacer::replace_within(tx, product.id, &payload.specs()).await?;
    Ok(product.id)
}

async fn save(state: &AppState, id: Option<i64>, payload: &ProductPayload, actor: i64) -> Result<Product, ApiError> {
    let mut tx = state.store.begin().await?;
    let product_id = match write_product(tx.as_mut(), id, payload, actor).await {
        Ok(product_id) => {
            tx.commit().await?;
            product_id
        }
        Err(e) => {
            rollback_quietly(tx).await;
            return Err(e.into());
        }
    };

    state
        .store
        .find_product(product_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", product_id)))
}

/// GET /api/products - Newest first, filtered by title substring and status
pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<ProductListQuery>, QueryRejection>,
) -> ApiResult<Paged<Product>> {
    let Query(query) = query?;
    let page = state.page(&Pagination { page: query.page, page_size: query.page_size });
    let filter = ProductQuery {
        title: query.title.filter(|t| !t.trim().is_empty()),
        status: query.status,
    };

    let (products, total) = state.store.list_products(&filter, page).await?;
    Ok(ApiResponse::success(Paged::new(products, total, page)))
}

/// GET /api/products/:id
pub async fn show(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Product> {
    let Path(id) = path?;
    let product = state
        .store
        .find_product(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", id)))?;
    Ok(ApiResponse::success(product))
}

/// POST /api/products - Create with images and specs in one transaction
pub async fn create(
    State(state): State<AppState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    payload: Result<Json<ProductPayload>, JsonRejection>,
) -> ApiResult<Product> {
    let Json(payload) = payload?;
    payload.validate()?;

    let product = save(&state, None, &payload, actor.id).await?;
    tracing::info!("Product {} created by '{}'", product.id, actor.username);
    Ok(ApiResponse::created(product))
}

/// PUT /api/products/:id - Replace fields, images and specs
pub async fn update(
    State(state): State<AppState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ProductPayload>, JsonRejection>,
) -> ApiResult<Product> {
    let Path(id) = path?;
    let Json(payload) = payload?;
    payload.validate()?;

    let product = save(&state, Some(id), &payload, actor.id).await?;
    Ok(ApiResponse::success(product))
}

/// PUT /api/products/:id/status - List or delist
pub async fn set_status(
    State(state): State<AppState>,
    Extension(CurrentUser(actor)): Extension<CurrentUser>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Product> {
    let Path(id) = path?;
    let Json(request) = payload?;
    check_status(request.status)?;

    let product = state
        .store
        .set_product_status(id, request.status, Some(actor.id))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Product {} not found", id)))?;
    Ok(ApiResponse::success(product))
}

/// DELETE /api/products/:id - Removes the product and its children
pub async fn delete(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> ApiResult<Value> {
    let Path(id) = path?;

    let mut tx = state.store.begin().await?;
    match tx.delete_product(id).await {
        Ok(true) => tx.commit().await?,
        Ok(false) => {
            rollback_quietly(tx).await;
            return Err(ApiError::not_found(format!("Product {} not found", id)));
        }
        Err(e) => {
            rollback_quietly(tx).await;
            return Err(e.into());
        }
    }

    Ok(ApiResponse::success(json!({ "id": id, "deleted": true })))
}
