use std::collections::BTreeMap;

use async_trait::async_trait;
use common::{LinkCategoryId, LinkItemId, ProductId, StockId, TransactionId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::record::{
    AccountConfig, AccountStock, HistoryRecord, HistoryStatus, LinkCategory, LinkItem,
    NewHistoryRecord, Product, ProductKind,
};
use crate::store::{CatalogStore, StockClaim};
use crate::{CatalogError, Result};

/// PostgreSQL-backed catalog store.
#[derive(Clone)]
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    /// Creates a new PostgreSQL catalog store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        let kind: String = row.try_get("product_type")?;
        let kind: ProductKind = serde_json::from_value(serde_json::Value::String(kind))?;

        let account_config: Option<serde_json::Value> = row.try_get("account_config")?;
        let account_config: Option<AccountConfig> = account_config
            .map(serde_json::from_value)
            .transpose()?;

        Ok(Product {
            id: ProductId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            product_code: row.try_get("product_code")?,
            kind,
            group_email: row.try_get("group_email")?,
            prefix_code: row.try_get("prefix_code")?,
            role: row.try_get("role")?,
            account_config,
            email_subject: row.try_get("email_subject")?,
            email_body: row.try_get("email_body")?,
            template_url: row.try_get("template_url")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_stock(row: PgRow) -> Result<AccountStock> {
        let account_data: serde_json::Value = row.try_get("account_data")?;
        let account_data: BTreeMap<String, String> = serde_json::from_value(account_data)?;

        Ok(AccountStock {
            id: StockId::from_uuid(row.try_get::<Uuid, _>("id")?),
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            account_data,
            is_sold: row.try_get("is_sold")?,
            sold_at: row.try_get("sold_at")?,
            sold_to: row.try_get("sold_to")?,
            transaction_id: row
                .try_get::<Option<String>, _>("transaction_id")?
                .map(TransactionId::new),
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_category(row: PgRow) -> Result<LinkCategory> {
        Ok(LinkCategory {
            id: LinkCategoryId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            group_email: row.try_get("group_email")?,
            email_subject: row.try_get("email_subject")?,
            email_body: row.try_get("email_body")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<LinkItem> {
        Ok(LinkItem {
            id: LinkItemId::from_uuid(row.try_get::<Uuid, _>("id")?),
            category_id: LinkCategoryId::from_uuid(row.try_get::<Uuid, _>("category_id")?),
            name: row.try_get("name")?,
            download_url: row.try_get("download_url")?,
            drive_url: row.try_get("drive_url")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_history(row: PgRow) -> Result<HistoryRecord> {
        let status: String = row.try_get("status")?;
        let status: HistoryStatus = serde_json::from_value(serde_json::Value::String(status))?;

        let raw_data: Option<serde_json::Value> = row.try_get("raw_data")?;
        let raw_data: Option<BTreeMap<String, String>> =
            raw_data.map(serde_json::from_value).transpose()?;

        Ok(HistoryRecord {
            id: row.try_get("id")?,
            buyer_email: row.try_get("buyer_email")?,
            product_name: row.try_get("product_name")?,
            product_code: row.try_get("product_code")?,
            generated_id: TransactionId::new(row.try_get::<String, _>("generated_id")?),
            status,
            message: row.try_get("message")?,
            raw_data,
            created_at: row.try_get("created_at")?,
        })
    }

    fn map_db_error(e: sqlx::Error) -> CatalogError {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.is_unique_violation() {
                return CatalogError::UniqueViolation {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                };
            }
        }
        CatalogError::Database(e)
    }

    async fn insert_stock_tx<'c>(
        tx: &mut sqlx::Transaction<'c, sqlx::Postgres>,
        stock: &AccountStock,
    ) -> Result<()> {
        let account_data = serde_json::to_value(&stock.account_data)?;

        sqlx::query(
            r#"
            INSERT INTO account_stocks
                (id, product_id, account_data, is_sold, sold_at, sold_to, transaction_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(stock.id.as_uuid())
        .bind(stock.product_id.as_uuid())
        .bind(account_data)
        .bind(stock.is_sold)
        .bind(stock.sold_at)
        .bind(&stock.sold_to)
        .bind(stock.transaction_id.as_ref().map(|t| t.as_str()))
        .bind(stock.created_at)
        .execute(&mut **tx)
        .await
        .map_err(Self::map_db_error)?;

        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn insert_product(&self, product: Product) -> Result<()> {
        let kind = product.kind.to_string();
        let account_config = product
            .account_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO products
                (id, name, product_code, product_type, group_email, prefix_code, role,
                 account_config, email_subject, email_body, template_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(product.id.as_uuid())
        .bind(&product.name)
        .bind(&product.product_code)
        .bind(kind)
        .bind(&product.group_email)
        .bind(&product.prefix_code)
        .bind(&product.role)
        .bind(account_config)
        .bind(&product.email_subject)
        .bind(&product.email_body)
        .bind(&product.template_url)
        .bind(product.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(())
    }

    async fn get_product(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn get_products(&self, ids: &[ProductId]) -> Result<Vec<Product>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query("SELECT * FROM products WHERE id = ANY($1)")
            .bind(&uuids)
            .fetch_all(&self.pool)
            .await?;

        let mut products = rows
            .into_iter()
            .map(Self::row_to_product)
            .collect::<Result<Vec<_>>>()?;

        // Return in request order; ANY($1) gives no ordering guarantee.
        products.sort_by_key(|p| ids.iter().position(|id| *id == p.id));
        Ok(products)
    }

    async fn insert_stock(&self, stock: AccountStock) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::insert_stock_tx(&mut tx, &stock).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_stock_batch(&self, stocks: Vec<AccountStock>) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        for stock in &stocks {
            Self::insert_stock_tx(&mut tx, stock).await?;
        }
        tx.commit().await?;
        Ok(stocks.len())
    }

    async fn list_stock(&self, product_id: ProductId) -> Result<Vec<AccountStock>> {
        let rows = sqlx::query(
            "SELECT * FROM account_stocks WHERE product_id = $1 ORDER BY created_at ASC",
        )
        .bind(product_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_stock).collect()
    }

    async fn find_unsold_stock(
        &self,
        product_id: ProductId,
        stock_id: StockId,
    ) -> Result<Option<AccountStock>> {
        let row = sqlx::query(
            "SELECT * FROM account_stocks WHERE id = $1 AND product_id = $2 AND is_sold = FALSE",
        )
        .bind(stock_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
    }

    async fn oldest_unsold_stock(&self, product_id: ProductId) -> Result<Option<AccountStock>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM account_stocks
            WHERE product_id = $1 AND is_sold = FALSE
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_stock).transpose()
    }

    #[tracing::instrument(skip(self, claim), fields(buyer = %claim.sold_to))]
    async fn mark_stock_sold(&self, stock_id: StockId, claim: StockClaim) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE account_stocks
            SET is_sold = TRUE, sold_at = $2, sold_to = $3, transaction_id = $4
            WHERE id = $1 AND is_sold = FALSE
            "#,
        )
        .bind(stock_id.as_uuid())
        .bind(claim.sold_at)
        .bind(claim.sold_to.as_str())
        .bind(claim.transaction_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(result.rows_affected())
    }

    async fn delete_unsold_stock(&self, stock_id: StockId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM account_stocks WHERE id = $1 AND is_sold = FALSE")
            .bind(stock_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_link_category(&self, category: LinkCategory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO link_categories (id, name, group_email, email_subject, email_body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(category.id.as_uuid())
        .bind(&category.name)
        .bind(&category.group_email)
        .bind(&category.email_subject)
        .bind(&category.email_body)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(())
    }

    async fn get_link_category(&self, id: LinkCategoryId) -> Result<Option<LinkCategory>> {
        let row = sqlx::query("SELECT * FROM link_categories WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_category).transpose()
    }

    async fn insert_link_item(&self, item: LinkItem) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO link_items (id, category_id, name, download_url, drive_url, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(item.category_id.as_uuid())
        .bind(&item.name)
        .bind(&item.download_url)
        .bind(&item.drive_url)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(())
    }

    async fn get_link_items(&self, ids: &[LinkItemId]) -> Result<Vec<LinkItem>> {
        let uuids: Vec<Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query("SELECT * FROM link_items WHERE id = ANY($1)")
            .bind(&uuids)
            .fetch_all(&self.pool)
            .await?;

        let mut items = rows
            .into_iter()
            .map(Self::row_to_item)
            .collect::<Result<Vec<_>>>()?;

        items.sort_by_key(|i| ids.iter().position(|id| *id == i.id));
        Ok(items)
    }

    async fn insert_history(&self, record: NewHistoryRecord) -> Result<()> {
        let record = record.into_record();
        let raw_data = record
            .raw_data
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO history
                (id, buyer_email, product_name, product_code, generated_id, status,
                 message, raw_data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(&record.buyer_email)
        .bind(&record.product_name)
        .bind(&record.product_code)
        .bind(record.generated_id.as_str())
        .bind(record.status.to_string())
        .bind(&record.message)
        .bind(raw_data)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(Self::map_db_error)?;

        Ok(())
    }

    async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query("SELECT * FROM history ORDER BY created_at DESC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_history).collect()
    }
}
