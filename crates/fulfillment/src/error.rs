//! Fulfillment error taxonomy.

use catalog::CatalogError;
use common::{ProductId, StockId};
use thiserror::Error;

/// Errors that can occur during order fulfillment.
///
/// Everything before allocation aborts with no state change. After the
/// inventory claim commits, failures degrade to logging instead of becoming
/// errors; only an unexpected store failure surfaces as `Store`/`Internal`.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The request is malformed (missing buyer, empty item list, wrong
    /// product kind). Rejected before any state change.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The referenced product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// None of the requested link items exist.
    #[error("No link items found for the requested ids")]
    ItemsNotFound,

    /// FIFO path: the product has no available stock.
    #[error("Product {0} is out of stock")]
    OutOfStock(ProductId),

    /// Discrete path: the chosen stock unit is sold, deleted, or not part of
    /// this product. Never retried; the unit was chosen explicitly.
    #[error("Stock unit {0} is already sold or not valid")]
    StockUnavailable(StockId),

    /// Internal: another request won the conditional claim. FIFO callers
    /// retry once with a refreshed selection; discrete callers surface
    /// `StockUnavailable`.
    #[error("Lost the claim race for stock unit {0}")]
    RaceLost(StockId),

    /// Catalog store error.
    #[error("Catalog store error: {0}")]
    Store(#[from] CatalogError),

    /// Unexpected failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
