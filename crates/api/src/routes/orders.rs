//! Fulfillment endpoints and history listing.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use catalog::{CatalogStore, HistoryRecord};
use fulfillment::services::{
    InMemoryDirectoryService, InMemoryDriveService, InMemoryMailService, TemplateFetcher,
};
use fulfillment::{
    AccountOrder, FulfillmentOrchestrator, FulfillmentReceipt, LinkOrder, MembershipOrder,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
///
/// Directory, drive, and mail collaborators are process-level handles
/// constructed at bootstrap; the template fetcher varies between the real
/// HTTP binding and the in-memory test double.
pub struct AppState<S: CatalogStore, F: TemplateFetcher> {
    pub store: S,
    pub orchestrator: FulfillmentOrchestrator<
        S,
        InMemoryDirectoryService,
        InMemoryDriveService,
        InMemoryMailService,
        F,
    >,
}

/// POST /orders/account — fulfill one unit of an account product.
#[tracing::instrument(skip(state, order))]
pub async fn account<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Json(order): Json<AccountOrder>,
) -> Result<Json<FulfillmentReceipt>, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let receipt = state.orchestrator.fulfill_account(order).await?;
    Ok(Json(receipt))
}

/// POST /orders/membership — fulfill membership products.
#[tracing::instrument(skip(state, order))]
pub async fn membership<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Json(order): Json<MembershipOrder>,
) -> Result<Json<FulfillmentReceipt>, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let receipt = state.orchestrator.fulfill_membership(order).await?;
    Ok(Json(receipt))
}

/// POST /orders/links — fulfill link items.
#[tracing::instrument(skip(state, order))]
pub async fn links<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Json(order): Json<LinkOrder>,
) -> Result<Json<FulfillmentReceipt>, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let receipt = state.orchestrator.fulfill_links(order).await?;
    Ok(Json(receipt))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum number of records to return, newest first.
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub records: Vec<HistoryRecord>,
}

/// GET /history — list recent fulfillment history, newest first.
#[tracing::instrument(skip(state))]
pub async fn history<S, F>(
    State(state): State<Arc<AppState<S, F>>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let limit = query.limit.unwrap_or(100).min(1000);
    let records = state.store.recent_history(limit).await?;
    Ok(Json(HistoryResponse { records }))
}
