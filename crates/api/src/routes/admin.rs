//! Catalog seeding endpoints.
//!
//! The admin console's full CRUD surface lives elsewhere; these routes cover
//! what the fulfillment engine needs populated: products, stock rows, link
//! categories, and link items. Stock deletion carries the unsold-only guard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use catalog::{
    AccountConfig, AccountStock, CatalogStore, LinkCategory, LinkItem, Product, ProductKind,
};
use common::{LinkCategoryId, ProductId, StockId};
use fulfillment::services::TemplateFetcher;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::orders::AppState;

#[derive(Deserialize)]
pub struct CreateProductRequest {
    pub name: String,
    pub product_code: String,
    pub product_type: ProductKind,
    pub group_email: Option<String>,
    pub prefix_code: Option<String>,
    pub role: Option<String>,
    pub account_config: Option<AccountConfig>,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub template_url: Option<String>,
}

/// POST /products — create a product.
#[tracing::instrument(skip(state, req))]
pub async fn create_product<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Json(req): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    if req.name.trim().is_empty() || req.product_code.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "name and product_code are required".to_string(),
        ));
    }

    let mut product = Product::new(req.name, req.product_code, req.product_type);
    product.group_email = req.group_email;
    product.prefix_code = req.prefix_code;
    product.role = req.role;
    product.account_config = req.account_config;
    product.email_subject = req.email_subject;
    product.email_body = req.email_body;
    product.template_url = req.template_url;

    state.store.insert_product(product.clone()).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Deserialize)]
pub struct AddStockRequest {
    /// One entry per stock unit: field name → value.
    pub units: Vec<BTreeMap<String, String>>,
}

#[derive(Serialize)]
pub struct AddStockResponse {
    pub inserted: usize,
    pub stock_ids: Vec<StockId>,
}

/// POST /products/{id}/stock — bulk-insert available stock rows.
#[tracing::instrument(skip(state, req))]
pub async fn add_stock<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Path(id): Path<String>,
    Json(req): Json<AddStockRequest>,
) -> Result<(StatusCode, Json<AddStockResponse>), ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let product_id = ProductId::from_uuid(parse_uuid(&id)?);
    let product = state
        .store
        .get_product(product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Product {id} not found")))?;

    if req.units.is_empty() {
        return Err(ApiError::BadRequest("no stock units supplied".to_string()));
    }

    let stocks: Vec<AccountStock> = req
        .units
        .into_iter()
        .map(|data| AccountStock::available(product.id, data))
        .collect();
    let stock_ids: Vec<StockId> = stocks.iter().map(|s| s.id).collect();

    let inserted = state.store.insert_stock_batch(stocks).await?;
    Ok((
        StatusCode::CREATED,
        Json(AddStockResponse {
            inserted,
            stock_ids,
        }),
    ))
}

/// GET /products/{id}/stock — list all stock rows of a product.
#[tracing::instrument(skip(state))]
pub async fn list_stock<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AccountStock>>, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let product_id = ProductId::from_uuid(parse_uuid(&id)?);
    let stocks = state.store.list_stock(product_id).await?;
    Ok(Json(stocks))
}

/// DELETE /stock/{id} — delete an unsold stock row. Sold rows are never
/// deleted; attempting to reports not-found.
#[tracing::instrument(skip(state))]
pub async fn delete_stock<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let stock_id = StockId::from_uuid(parse_uuid(&id)?);
    let affected = state.store.delete_unsold_stock(stock_id).await?;
    if affected == 0 {
        return Err(ApiError::NotFound(format!(
            "Stock {id} not found or already sold"
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub group_email: Option<String>,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
}

/// POST /link-categories — create a link category.
#[tracing::instrument(skip(state, req))]
pub async fn create_category<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Json(req): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<LinkCategory>), ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let mut category = LinkCategory::new(req.name);
    category.group_email = req.group_email;
    category.email_subject = req.email_subject;
    category.email_body = req.email_body;

    state.store.insert_link_category(category.clone()).await?;
    Ok((StatusCode::CREATED, Json(category)))
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub name: String,
    pub download_url: Option<String>,
    pub drive_url: Option<String>,
}

/// POST /link-categories/{id}/items — add a link item to a category.
#[tracing::instrument(skip(state, req))]
pub async fn create_item<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Path(id): Path<String>,
    Json(req): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<LinkItem>), ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let category_id = LinkCategoryId::from_uuid(parse_uuid(&id)?);
    let category = state
        .store
        .get_link_category(category_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Category {id} not found")))?;

    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let mut item = LinkItem::new(category.id, req.name);
    item.download_url = req.download_url;
    item.drive_url = req.drive_url;

    state.store.insert_link_item(item.clone()).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

fn parse_uuid(id: &str) -> Result<uuid::Uuid, ApiError> {
    uuid::Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
