//! Shared types used across the fulfillment system.

pub mod types;

pub use types::{
    BuyerEmail, InvalidBuyerEmail, LinkCategoryId, LinkItemId, ProductId, StockId, TransactionId,
};
