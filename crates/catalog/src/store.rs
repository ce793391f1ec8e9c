use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{BuyerEmail, LinkCategoryId, LinkItemId, ProductId, StockId, TransactionId};

use crate::record::{
    AccountStock, HistoryRecord, LinkCategory, LinkItem, NewHistoryRecord, Product,
};
use crate::Result;

/// The field values written by the conditional stock claim.
#[derive(Debug, Clone)]
pub struct StockClaim {
    /// Buyer the unit is sold to.
    pub sold_to: BuyerEmail,
    /// Transaction id binding the sale together.
    pub transaction_id: TransactionId,
    /// Sale timestamp.
    pub sold_at: DateTime<Utc>,
}

impl StockClaim {
    /// Creates a claim stamped with the current time.
    pub fn new(sold_to: BuyerEmail, transaction_id: TransactionId) -> Self {
        Self {
            sold_to,
            transaction_id,
            sold_at: Utc::now(),
        }
    }
}

/// Core trait for catalog store implementations.
///
/// All implementations must be thread-safe (Send + Sync). The fulfillment
/// core depends only on these operations; everything else about the backing
/// store (query engine, transactions, RLS) stays behind this boundary.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a product. Admin seeding; the fulfillment core never writes
    /// products.
    async fn insert_product(&self, product: Product) -> Result<()>;

    /// Fetches a product by id.
    async fn get_product(&self, id: ProductId) -> Result<Option<Product>>;

    /// Fetches the products matching the given ids. Unknown ids are skipped;
    /// results are returned in the order requested.
    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>>;

    /// Inserts a single available stock row.
    async fn insert_stock(&self, stock: AccountStock) -> Result<()>;

    /// Inserts a batch of available stock rows (bulk import). Returns the
    /// number inserted.
    async fn insert_stock_batch(&self, stocks: Vec<AccountStock>) -> Result<usize>;

    /// Lists all stock rows of a product, oldest first.
    async fn list_stock(&self, product_id: ProductId) -> Result<Vec<AccountStock>>;

    /// Fetches a specific stock row only if it belongs to the product and is
    /// still unsold (the discrete-claim filter).
    async fn find_unsold_stock(
        &self,
        product_id: ProductId,
        stock_id: StockId,
    ) -> Result<Option<AccountStock>>;

    /// Fetches the oldest unsold stock row of a product (the FIFO-claim
    /// filter), or None when the product is out of stock.
    async fn oldest_unsold_stock(&self, product_id: ProductId) -> Result<Option<AccountStock>>;

    /// The conditional claim: sets `is_sold = true` and the sale fields on
    /// the row, guarded by `id = stock_id AND is_sold = false`, and returns
    /// the number of rows affected.
    ///
    /// Zero means another request won the race (or the row is gone); callers
    /// must treat that as a lost claim, never as success. This is the only
    /// write path that sells stock; `is_sold` never reverts.
    async fn mark_stock_sold(&self, stock_id: StockId, claim: StockClaim) -> Result<u64>;

    /// Deletes a stock row, guarded by `is_sold = false`. Sold rows are
    /// never physically deleted. Returns the number of rows affected.
    async fn delete_unsold_stock(&self, stock_id: StockId) -> Result<u64>;

    /// Inserts a link category. Admin seeding.
    async fn insert_link_category(&self, category: LinkCategory) -> Result<()>;

    /// Fetches a link category by id.
    async fn get_link_category(&self, id: LinkCategoryId) -> Result<Option<LinkCategory>>;

    /// Inserts a link item. Admin seeding.
    async fn insert_link_item(&self, item: LinkItem) -> Result<()>;

    /// Fetches the link items matching the given ids. Unknown ids are
    /// skipped; results are returned in the order requested.
    async fn get_link_items(&self, ids: &[LinkItemId]) -> Result<Vec<LinkItem>>;

    /// Appends a history record. History is append-only: no update or delete
    /// operation exists on this trait.
    async fn insert_history(&self, record: NewHistoryRecord) -> Result<()>;

    /// Lists the most recent history records, newest first.
    async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>>;
}
