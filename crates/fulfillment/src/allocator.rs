//! Inventory allocation: selecting and atomically claiming stock.

use catalog::{AccountStock, CatalogError, CatalogStore, Product, StockClaim};
use common::{BuyerEmail, StockId, TransactionId};

use crate::error::FulfillmentError;
use crate::txn::generate_transaction_id;

/// A successfully claimed unit of inventory.
#[derive(Debug, Clone)]
pub struct AllocatedUnit {
    /// The claimed stock row, with the sale fields populated.
    pub stock: AccountStock,
    /// The transaction id stamped onto the row.
    pub transaction_id: TransactionId,
}

/// Selects and atomically claims one unit of sellable inventory.
///
/// The claim is a single conditional write guarded by `is_sold = false`;
/// a plain read-then-write has a lost-update race under concurrent buyers.
/// Zero affected rows means another request won and this one lost.
#[derive(Debug, Clone)]
pub struct StockAllocator<S> {
    store: S,
}

impl<S: CatalogStore> StockAllocator<S> {
    /// Creates an allocator over the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Allocates one stock unit of an account product for the buyer.
    ///
    /// With `requested` set this is a discrete claim: the exact unit or
    /// nothing, no retry. Without it, the oldest available unit is claimed
    /// (FIFO), retrying once with a refreshed selection if the first claim
    /// loses a race.
    #[tracing::instrument(skip(self, product, buyer), fields(product_id = %product.id))]
    pub async fn allocate(
        &self,
        product: &Product,
        buyer: &BuyerEmail,
        requested: Option<StockId>,
    ) -> Result<AllocatedUnit, FulfillmentError> {
        match requested {
            Some(stock_id) => self.claim_discrete(product, buyer, stock_id).await,
            None => self.claim_fifo(product, buyer).await,
        }
    }

    async fn claim_discrete(
        &self,
        product: &Product,
        buyer: &BuyerEmail,
        stock_id: StockId,
    ) -> Result<AllocatedUnit, FulfillmentError> {
        let stock = self
            .store
            .find_unsold_stock(product.id, stock_id)
            .await?
            .ok_or(FulfillmentError::StockUnavailable(stock_id))?;

        match self.try_claim(product, buyer, stock).await? {
            Some(unit) => Ok(unit),
            // The buyer chose this exact unit; losing the race means it is
            // gone, not that another unit should be substituted.
            None => Err(FulfillmentError::StockUnavailable(stock_id)),
        }
    }

    async fn claim_fifo(
        &self,
        product: &Product,
        buyer: &BuyerEmail,
    ) -> Result<AllocatedUnit, FulfillmentError> {
        for attempt in 0..2 {
            let stock = self
                .store
                .oldest_unsold_stock(product.id)
                .await?
                .ok_or(FulfillmentError::OutOfStock(product.id))?;
            let stock_id = stock.id;

            if let Some(unit) = self.try_claim(product, buyer, stock).await? {
                return Ok(unit);
            }

            tracing::warn!(
                %stock_id,
                attempt,
                "lost stock claim race, refreshing selection"
            );
            metrics::counter!("stock_claim_races_total").increment(1);
        }

        Err(FulfillmentError::OutOfStock(product.id))
    }

    /// Attempts the conditional claim on a selected row.
    ///
    /// Returns None when zero rows were affected (race lost). A unique-key
    /// violation means the generated transaction id collided with an
    /// existing one; the id is regenerated and the claim retried once.
    async fn try_claim(
        &self,
        product: &Product,
        buyer: &BuyerEmail,
        stock: AccountStock,
    ) -> Result<Option<AllocatedUnit>, FulfillmentError> {
        let mut transaction_id = generate_transaction_id(product.transaction_prefix());

        for attempt in 0..2 {
            let claim = StockClaim::new(buyer.clone(), transaction_id.clone());
            let sold_at = claim.sold_at;

            match self.store.mark_stock_sold(stock.id, claim).await {
                Ok(1) => {
                    let mut stock = stock;
                    stock.is_sold = true;
                    stock.sold_at = Some(sold_at);
                    stock.sold_to = Some(buyer.as_str().to_string());
                    stock.transaction_id = Some(transaction_id.clone());
                    return Ok(Some(AllocatedUnit {
                        stock,
                        transaction_id,
                    }));
                }
                Ok(_) => return Ok(None),
                Err(CatalogError::UniqueViolation { constraint }) if attempt == 0 => {
                    tracing::warn!(
                        %constraint,
                        old_id = %transaction_id,
                        "transaction id collision, regenerating"
                    );
                    transaction_id = generate_transaction_id(product.transaction_prefix());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FulfillmentError::RaceLost(stock.id))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use catalog::{InMemoryCatalogStore, ProductKind};

    use super::*;

    fn buyer() -> BuyerEmail {
        BuyerEmail::parse("b@y.com").unwrap()
    }

    fn account_data(email: &str) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert("Email".to_string(), email.to_string());
        data.insert("Password".to_string(), "p1".to_string());
        data
    }

    async fn setup() -> (InMemoryCatalogStore, StockAllocator<InMemoryCatalogStore>, Product) {
        let store = InMemoryCatalogStore::new();
        let mut product = Product::new("Netflix Premium", "NFX-01", ProductKind::Account);
        product.prefix_code = Some("NFX".to_string());
        store.insert_product(product.clone()).await.unwrap();
        let allocator = StockAllocator::new(store.clone());
        (store, allocator, product)
    }

    #[tokio::test]
    async fn fifo_claims_oldest_available_unit() {
        let (store, allocator, product) = setup().await;

        let mut first = AccountStock::available(product.id, account_data("a@x.com"));
        first.created_at -= chrono::Duration::seconds(60);
        let first_id = first.id;
        store.insert_stock(first).await.unwrap();
        store
            .insert_stock(AccountStock::available(product.id, account_data("b@x.com")))
            .await
            .unwrap();

        let unit = allocator.allocate(&product, &buyer(), None).await.unwrap();

        assert_eq!(unit.stock.id, first_id);
        assert!(unit.transaction_id.as_str().starts_with("NFX-"));
        assert!(unit.stock.is_sold);
        assert_eq!(unit.stock.sold_to.as_deref(), Some("b@y.com"));

        let row = store.stock_by_id(first_id).await.unwrap();
        assert!(row.is_sold);
        assert_eq!(row.transaction_id, Some(unit.transaction_id));
    }

    #[tokio::test]
    async fn fifo_with_no_stock_is_out_of_stock() {
        let (store, allocator, product) = setup().await;

        let result = allocator.allocate(&product, &buyer(), None).await;
        assert!(matches!(result, Err(FulfillmentError::OutOfStock(_))));

        // Nothing was mutated.
        assert_eq!(store.list_stock(product.id).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn discrete_claim_takes_the_chosen_unit() {
        let (store, allocator, product) = setup().await;

        let stock = AccountStock::available(product.id, account_data("a@x.com"));
        let stock_id = stock.id;
        store.insert_stock(stock).await.unwrap();
        store
            .insert_stock(AccountStock::available(product.id, account_data("b@x.com")))
            .await
            .unwrap();

        let unit = allocator
            .allocate(&product, &buyer(), Some(stock_id))
            .await
            .unwrap();
        assert_eq!(unit.stock.id, stock_id);
    }

    #[tokio::test]
    async fn discrete_claim_on_sold_unit_is_unavailable() {
        let (store, allocator, product) = setup().await;

        let stock = AccountStock::available(product.id, account_data("a@x.com"));
        let stock_id = stock.id;
        store.insert_stock(stock).await.unwrap();

        // A concurrent request just took it.
        allocator.allocate(&product, &buyer(), None).await.unwrap();

        let result = allocator.allocate(&product, &buyer(), Some(stock_id)).await;
        assert!(matches!(
            result,
            Err(FulfillmentError::StockUnavailable(id)) if id == stock_id
        ));
    }

    #[tokio::test]
    async fn discrete_claim_on_foreign_unit_is_unavailable() {
        let (store, allocator, product) = setup().await;

        let other_product = Product::new("Other", "OTH-01", ProductKind::Account);
        store.insert_product(other_product.clone()).await.unwrap();
        let foreign = AccountStock::available(other_product.id, account_data("a@x.com"));
        let foreign_id = foreign.id;
        store.insert_stock(foreign).await.unwrap();

        let result = allocator
            .allocate(&product, &buyer(), Some(foreign_id))
            .await;
        assert!(matches!(result, Err(FulfillmentError::StockUnavailable(_))));

        // The foreign row stays available.
        let row = store.stock_by_id(foreign_id).await.unwrap();
        assert!(!row.is_sold);
    }

    #[tokio::test]
    async fn concurrent_fifo_claims_sell_exactly_once() {
        let (store, allocator, product) = setup().await;

        store
            .insert_stock(AccountStock::available(product.id, account_data("a@x.com")))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let allocator = allocator.clone();
            let product = product.clone();
            let buyer = BuyerEmail::parse(format!("buyer{i}@y.com")).unwrap();
            handles.push(tokio::spawn(async move {
                allocator.allocate(&product, &buyer, None).await
            }));
        }

        let mut wins = 0;
        let mut out_of_stock = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(FulfillmentError::OutOfStock(_)) => out_of_stock += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(out_of_stock, 7);

        let rows = store.list_stock(product.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_sold);
    }

    #[tokio::test]
    async fn sold_state_never_reverts() {
        let (store, allocator, product) = setup().await;

        let stock = AccountStock::available(product.id, account_data("a@x.com"));
        let stock_id = stock.id;
        store.insert_stock(stock).await.unwrap();

        let unit = allocator.allocate(&product, &buyer(), None).await.unwrap();

        // Any further attempt on the same unit fails and leaves it sold.
        let result = allocator.allocate(&product, &buyer(), Some(stock_id)).await;
        assert!(result.is_err());

        let row = store.stock_by_id(stock_id).await.unwrap();
        assert!(row.is_sold);
        assert_eq!(row.transaction_id, Some(unit.transaction_id));
    }
}
