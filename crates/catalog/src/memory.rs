use std::sync::Arc;

use async_trait::async_trait;
use common::{LinkCategoryId, LinkItemId, ProductId, StockId};
use tokio::sync::RwLock;

use crate::record::{
    AccountStock, HistoryRecord, LinkCategory, LinkItem, NewHistoryRecord, Product,
};
use crate::store::{CatalogStore, StockClaim};
use crate::{CatalogError, Result};

#[derive(Default)]
struct State {
    products: Vec<Product>,
    stocks: Vec<AccountStock>,
    categories: Vec<LinkCategory>,
    items: Vec<LinkItem>,
    history: Vec<HistoryRecord>,
}

/// In-memory catalog store.
///
/// Used by tests and the default server. Provides the same interface and
/// guard semantics as the PostgreSQL implementation, including the unique
/// transaction-id constraint on stock claims.
#[derive(Clone, Default)]
pub struct InMemoryCatalogStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryCatalogStore {
    /// Creates a new empty in-memory catalog store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of history records stored.
    pub async fn history_count(&self) -> usize {
        self.state.read().await.history.len()
    }

    /// Returns a stock row by id regardless of sold state.
    pub async fn stock_by_id(&self, stock_id: StockId) -> Option<AccountStock> {
        self.state
            .read()
            .await
            .stocks
            .iter()
            .find(|s| s.id == stock_id)
            .cloned()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn insert_product(&self, product: Product) -> Result<()> {
        let mut state = self.state.write().await;
        if state.products.iter().any(|p| p.id == product.id) {
            return Err(CatalogError::UniqueViolation {
                constraint: "products_pkey".to_string(),
            });
        }
        state.products.push(product);
        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.iter().find(|p| p.id == id).cloned())
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.products.iter().find(|p| p.id == *id).cloned())
            .collect())
    }

    async fn insert_stock(&self, stock: AccountStock) -> Result<()> {
        let mut state = self.state.write().await;
        if state.stocks.iter().any(|s| s.id == stock.id) {
            return Err(CatalogError::UniqueViolation {
                constraint: "account_stocks_pkey".to_string(),
            });
        }
        state.stocks.push(stock);
        Ok(())
    }

    async fn insert_stock_batch(&self, stocks: Vec<AccountStock>) -> Result<usize> {
        let mut state = self.state.write().await;
        let count = stocks.len();
        for stock in stocks {
            if state.stocks.iter().any(|s| s.id == stock.id) {
                return Err(CatalogError::UniqueViolation {
                    constraint: "account_stocks_pkey".to_string(),
                });
            }
            state.stocks.push(stock);
        }
        Ok(count)
    }

    async fn list_stock(&self, product_id: ProductId) -> Result<Vec<AccountStock>> {
        let state = self.state.read().await;
        let mut stocks: Vec<_> = state
            .stocks
            .iter()
            .filter(|s| s.product_id == product_id)
            .cloned()
            .collect();
        stocks.sort_by_key(|s| s.created_at);
        Ok(stocks)
    }

    async fn find_unsold_stock(
        &self,
        product_id: ProductId,
        stock_id: StockId,
    ) -> Result<Option<AccountStock>> {
        let state = self.state.read().await;
        Ok(state
            .stocks
            .iter()
            .find(|s| s.id == stock_id && s.product_id == product_id && !s.is_sold)
            .cloned())
    }

    async fn oldest_unsold_stock(&self, product_id: ProductId) -> Result<Option<AccountStock>> {
        let state = self.state.read().await;
        Ok(state
            .stocks
            .iter()
            .filter(|s| s.product_id == product_id && !s.is_sold)
            .min_by_key(|s| s.created_at)
            .cloned())
    }

    async fn mark_stock_sold(&self, stock_id: StockId, claim: StockClaim) -> Result<u64> {
        let mut state = self.state.write().await;

        // Unique transaction_id constraint simulation.
        if state
            .stocks
            .iter()
            .any(|s| s.transaction_id.as_ref() == Some(&claim.transaction_id))
        {
            return Err(CatalogError::UniqueViolation {
                constraint: "account_stocks_transaction_id_key".to_string(),
            });
        }

        match state
            .stocks
            .iter_mut()
            .find(|s| s.id == stock_id && !s.is_sold)
        {
            Some(stock) => {
                stock.is_sold = true;
                stock.sold_at = Some(claim.sold_at);
                stock.sold_to = Some(claim.sold_to.as_str().to_string());
                stock.transaction_id = Some(claim.transaction_id);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_unsold_stock(&self, stock_id: StockId) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.stocks.len();
        state.stocks.retain(|s| s.id != stock_id || s.is_sold);
        Ok((before - state.stocks.len()) as u64)
    }

    async fn insert_link_category(&self, category: LinkCategory) -> Result<()> {
        let mut state = self.state.write().await;
        if state.categories.iter().any(|c| c.id == category.id) {
            return Err(CatalogError::UniqueViolation {
                constraint: "link_categories_pkey".to_string(),
            });
        }
        state.categories.push(category);
        Ok(())
    }

    async fn get_link_category(&self, id: LinkCategoryId) -> Result<Option<LinkCategory>> {
        let state = self.state.read().await;
        Ok(state.categories.iter().find(|c| c.id == id).cloned())
    }

    async fn insert_link_item(&self, item: LinkItem) -> Result<()> {
        let mut state = self.state.write().await;
        if state.items.iter().any(|i| i.id == item.id) {
            return Err(CatalogError::UniqueViolation {
                constraint: "link_items_pkey".to_string(),
            });
        }
        state.items.push(item);
        Ok(())
    }

    async fn get_link_items(&self, ids: &[LinkItemId]) -> Result<Vec<LinkItem>> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.items.iter().find(|i| i.id == *id).cloned())
            .collect())
    }

    async fn insert_history(&self, record: NewHistoryRecord) -> Result<()> {
        let mut state = self.state.write().await;
        state.history.push(record.into_record());
        Ok(())
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let state = self.state.read().await;
        let mut records = state.history.clone();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }
}
