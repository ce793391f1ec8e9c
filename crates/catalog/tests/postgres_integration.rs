//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p catalog --test postgres_integration -- --test-threads=1
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use catalog::{
    AccountStock, CatalogError, CatalogStore, LinkCategory, LinkItem, NewHistoryRecord,
    PostgresCatalogStore, Product, ProductKind, StockClaim,
};
use common::{BuyerEmail, ProductId, StockId, TransactionId};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            // Run migrations using raw_sql to execute multiple statements
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_catalog_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresCatalogStore {
    let info = get_container_info().await;

    // Create a fresh pool for each test to avoid connection issues
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE products, account_stocks, link_categories, link_items, history")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCatalogStore::new(pool)
}

fn account_data(email: &str) -> BTreeMap<String, String> {
    let mut data = BTreeMap::new();
    data.insert("Email".to_string(), email.to_string());
    data.insert("Password".to_string(), "secret".to_string());
    data
}

async fn seed_account_product(store: &PostgresCatalogStore) -> Product {
    let mut product = Product::new("Netflix Premium", "NFX-01", ProductKind::Account);
    product.prefix_code = Some("NFX".to_string());
    store.insert_product(product.clone()).await.unwrap();
    product
}

fn claim(txn: &str) -> StockClaim {
    StockClaim::new(
        BuyerEmail::parse("buyer@example.com").unwrap(),
        TransactionId::new(txn),
    )
}

#[tokio::test]
#[serial_test::serial]
async fn insert_and_fetch_product_roundtrip() {
    let store = get_test_store().await;
    let product = seed_account_product(&store).await;

    let found = store.get_product(product.id).await.unwrap().unwrap();
    assert_eq!(found.name, "Netflix Premium");
    assert_eq!(found.kind, ProductKind::Account);
    assert_eq!(found.prefix_code.as_deref(), Some("NFX"));

    assert!(store.get_product(ProductId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn fifo_selection_returns_oldest_row() {
    let store = get_test_store().await;
    let product = seed_account_product(&store).await;

    let mut first = AccountStock::available(product.id, account_data("a@x.com"));
    first.created_at -= chrono::Duration::seconds(60);
    let first_id = first.id;
    let second = AccountStock::available(product.id, account_data("b@x.com"));

    store
        .insert_stock_batch(vec![second, first])
        .await
        .unwrap();

    let oldest = store.oldest_unsold_stock(product.id).await.unwrap().unwrap();
    assert_eq!(oldest.id, first_id);
    assert_eq!(oldest.account_data["Email"], "a@x.com");
}

#[tokio::test]
#[serial_test::serial]
async fn conditional_claim_affects_exactly_one_row() {
    let store = get_test_store().await;
    let product = seed_account_product(&store).await;

    let stock = AccountStock::available(product.id, account_data("a@x.com"));
    let stock_id = stock.id;
    store.insert_stock(stock).await.unwrap();

    let affected = store
        .mark_stock_sold(stock_id, claim("NFX-AAAAAAA001"))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    // The guard filters out already-sold rows.
    let affected = store
        .mark_stock_sold(stock_id, claim("NFX-BBBBBBB002"))
        .await
        .unwrap();
    assert_eq!(affected, 0);

    // Sold row no longer matches the unsold filters.
    assert!(store
        .find_unsold_stock(product.id, stock_id)
        .await
        .unwrap()
        .is_none());
    assert!(store.oldest_unsold_stock(product.id).await.unwrap().is_none());

    // The sale fields stuck.
    let rows = store.list_stock(product.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].is_sold);
    assert_eq!(rows[0].sold_to.as_deref(), Some("buyer@example.com"));
    assert_eq!(
        rows[0].transaction_id,
        Some(TransactionId::new("NFX-AAAAAAA001"))
    );
}

#[tokio::test]
#[serial_test::serial]
async fn duplicate_transaction_id_is_a_unique_violation() {
    let store = get_test_store().await;
    let product = seed_account_product(&store).await;

    let s1 = AccountStock::available(product.id, account_data("a@x.com"));
    let s2 = AccountStock::available(product.id, account_data("b@x.com"));
    let (id1, id2) = (s1.id, s2.id);
    store.insert_stock_batch(vec![s1, s2]).await.unwrap();

    store
        .mark_stock_sold(id1, claim("NFX-SAME000001"))
        .await
        .unwrap();

    let result = store.mark_stock_sold(id2, claim("NFX-SAME000001")).await;
    assert!(matches!(result, Err(CatalogError::UniqueViolation { .. })));
}

#[tokio::test]
#[serial_test::serial]
async fn delete_is_guarded_to_unsold_rows() {
    let store = get_test_store().await;
    let product = seed_account_product(&store).await;

    let sold = AccountStock::available(product.id, account_data("a@x.com"));
    let unsold = AccountStock::available(product.id, account_data("b@x.com"));
    let (sold_id, unsold_id) = (sold.id, unsold.id);
    store.insert_stock_batch(vec![sold, unsold]).await.unwrap();
    store
        .mark_stock_sold(sold_id, claim("NFX-CCCCCCC003"))
        .await
        .unwrap();

    assert_eq!(store.delete_unsold_stock(sold_id).await.unwrap(), 0);
    assert_eq!(store.delete_unsold_stock(unsold_id).await.unwrap(), 1);
    assert_eq!(store.delete_unsold_stock(StockId::new()).await.unwrap(), 0);

    let rows = store.list_stock(product.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, sold_id);
}

#[tokio::test]
#[serial_test::serial]
async fn link_items_roundtrip_in_request_order() {
    let store = get_test_store().await;

    let mut category = LinkCategory::new("PS1 Classics");
    category.group_email = Some("ps1@groups.example.com".to_string());
    let category_id = category.id;
    store.insert_link_category(category).await.unwrap();

    let mut i1 = LinkItem::new(category_id, "Game One");
    i1.drive_url = Some("https://drive.google.com/file/d/1234567890123456789012345/view".into());
    let i2 = LinkItem::new(category_id, "Game Two");
    let (id1, id2) = (i1.id, i2.id);
    store.insert_link_item(i1).await.unwrap();
    store.insert_link_item(i2).await.unwrap();

    let items = store.get_link_items(&[id2, id1]).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "Game Two");
    assert_eq!(items[1].name, "Game One");

    let found = store.get_link_category(category_id).await.unwrap().unwrap();
    assert_eq!(found.group_email.as_deref(), Some("ps1@groups.example.com"));
}

#[tokio::test]
#[serial_test::serial]
async fn history_appends_with_raw_data_backup() {
    let store = get_test_store().await;

    store
        .insert_history(
            NewHistoryRecord::success(
                "buyer@example.com",
                "Netflix Premium",
                "NFX-01",
                TransactionId::new("NFX-DDDDDDD004"),
            )
            .with_message("rendered body")
            .with_raw_data(account_data("a@x.com")),
        )
        .await
        .unwrap();

    let records = store.recent_history(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message.as_deref(), Some("rendered body"));
    assert_eq!(
        records[0].raw_data.as_ref().unwrap()["Email"],
        "a@x.com"
    );
}
