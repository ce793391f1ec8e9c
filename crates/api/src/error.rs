//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use catalog::CatalogError;
use fulfillment::FulfillmentError;

/// API-level error type that maps to HTTP responses.
///
/// Bodies are structured as `{"kind": ..., "message": ...}` so clients can
/// branch on the kind without parsing messages.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Resource not found.
    NotFound(String),
    /// Fulfillment error with its own status mapping.
    Fulfillment(FulfillmentError),
    /// Catalog store error.
    Catalog(CatalogError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "InvalidPayload", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "ProductNotFound", msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
            ApiError::Catalog(err) => catalog_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
        };

        let body = serde_json::json!({ "kind": kind, "message": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        FulfillmentError::InvalidPayload(_) => {
            (StatusCode::BAD_REQUEST, "InvalidPayload", message)
        }
        FulfillmentError::ProductNotFound(_) | FulfillmentError::ItemsNotFound => {
            (StatusCode::NOT_FOUND, "ProductNotFound", message)
        }
        FulfillmentError::OutOfStock(_) => (StatusCode::NOT_FOUND, "OutOfStock", message),
        FulfillmentError::StockUnavailable(_) => {
            (StatusCode::NOT_FOUND, "StockUnavailable", message)
        }
        FulfillmentError::RaceLost(_)
        | FulfillmentError::Store(_)
        | FulfillmentError::Internal(_) => {
            tracing::error!(error = %message, "fulfillment internal error");
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
        }
    }
}

fn catalog_error_to_response(err: CatalogError) -> (StatusCode, &'static str, String) {
    let message = err.to_string();
    match err {
        CatalogError::UniqueViolation { .. } => (StatusCode::CONFLICT, "Conflict", message),
        _ => {
            tracing::error!(error = %message, "catalog store error");
            (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", message)
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Catalog(err)
    }
}
