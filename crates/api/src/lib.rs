//! HTTP API server with observability for the fulfillment system.
//!
//! Provides fulfillment endpoints for the three product families, catalog
//! seeding routes, and history listing, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use catalog::CatalogStore;
use fulfillment::services::TemplateFetcher;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, F>(state: Arc<AppState<S, F>>, metrics_handle: PrometheusHandle) -> Router
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders/account", post(routes::orders::account::<S, F>))
        .route(
            "/orders/membership",
            post(routes::orders::membership::<S, F>),
        )
        .route("/orders/links", post(routes::orders::links::<S, F>))
        .route("/history", get(routes::orders::history::<S, F>))
        .route("/products", post(routes::admin::create_product::<S, F>))
        .route(
            "/products/{id}/stock",
            post(routes::admin::add_stock::<S, F>),
        )
        .route(
            "/products/{id}/stock",
            get(routes::admin::list_stock::<S, F>),
        )
        .route("/stock/{id}", delete(routes::admin::delete_stock::<S, F>))
        .route(
            "/link-categories",
            post(routes::admin::create_category::<S, F>),
        )
        .route(
            "/link-categories/{id}/items",
            post(routes::admin::create_item::<S, F>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// The in-memory collaborator handles behind a default application state.
///
/// Tests use these to steer failures and assert on delivered effects.
pub struct DefaultCollaborators {
    pub directory: fulfillment::InMemoryDirectoryService,
    pub drive: fulfillment::InMemoryDriveService,
    pub mail: fulfillment::InMemoryMailService,
    pub fetcher: fulfillment::InMemoryTemplateFetcher,
}

/// Creates application state over the given store with in-memory
/// collaborator services.
pub fn create_default_state<S>(
    store: S,
    config: &config::Config,
) -> (
    Arc<AppState<S, fulfillment::InMemoryTemplateFetcher>>,
    DefaultCollaborators,
)
where
    S: CatalogStore + Clone + Send + Sync + 'static,
{
    use fulfillment::{
        FulfillmentOrchestrator, InMemoryDirectoryService, InMemoryDriveService,
        InMemoryMailService, InMemoryTemplateFetcher,
    };

    let directory = InMemoryDirectoryService::new();
    let drive = InMemoryDriveService::new();
    let mail = InMemoryMailService::new();
    let fetcher = InMemoryTemplateFetcher::new();

    let orchestrator = FulfillmentOrchestrator::new(
        store.clone(),
        directory.clone(),
        drive.clone(),
        mail.clone(),
        fetcher.clone(),
        config.sender_email.clone(),
        config.effect_timeout,
    );

    let state = Arc::new(AppState {
        store,
        orchestrator,
    });

    (
        state,
        DefaultCollaborators {
            directory,
            drive,
            mail,
            fetcher,
        },
    )
}
