//! Fulfillment orchestration for the three product families.
//!
//! Flow per order: validate → allocate → render → side effects → record →
//! respond. Pre-allocation failures abort with no state change. From the
//! moment allocation starts, the remaining work runs inside a detached task:
//! a caller disconnect must not leave inventory claimed without an attempt
//! to notify and record. Nothing ever compensates a committed claim.

use std::collections::BTreeMap;
use std::time::Duration;

use catalog::{
    CatalogStore, HistoryStatus, LinkCategory, LinkItem, NewHistoryRecord, Product, ProductKind,
};
use common::{BuyerEmail, LinkCategoryId, LinkItemId, ProductId, StockId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::allocator::StockAllocator;
use crate::dispatcher::{SideEffect, SideEffectDispatcher};
use crate::error::FulfillmentError;
use crate::phase::{FulfillmentPhase, Progress};
use crate::recorder::HistoryRecorder;
use crate::render::{
    DEFAULT_ACCOUNT_TEMPLATE, DEFAULT_CATEGORY_SUBJECT, DEFAULT_CATEGORY_TEMPLATE,
    DEFAULT_ORDER_SUBJECT, DEFAULT_ORDER_TEMPLATE, render_account_message, render_category_email,
    render_tokens,
};
use crate::services::{DirectoryService, DriveService, MailService, TemplateFetcher};
use crate::txn::generate_transaction_id;

/// Request to fulfill one unit of an account (stock-backed) product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOrder {
    pub buyer_email: String,
    pub product_id: ProductId,
    /// A specific unit chosen by the buyer or admin; omitted for FIFO.
    #[serde(default)]
    pub stock_id: Option<StockId>,
}

/// Request to fulfill one or more membership (manual) products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipOrder {
    pub buyer_email: String,
    pub product_ids: Vec<ProductId>,
}

/// Request to fulfill one or more link items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkOrder {
    pub buyer_email: String,
    pub item_ids: Vec<LinkItemId>,
}

/// Per-line-item outcome in a receipt.
#[derive(Debug, Clone, Serialize)]
pub struct ItemReceipt {
    pub name: String,
    pub status: HistoryStatus,
}

/// The result of one fulfillment call.
///
/// Downstream delivery failures (email, history) never appear here; the
/// receipt reports the inventory/transaction outcome, which is final.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentReceipt {
    pub transaction_id: TransactionId,
    /// Rendered notification messages, one per outbound email.
    pub messages: Vec<String>,
    pub items: Vec<ItemReceipt>,
    /// Allocated credentials, present for account orders only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_data: Option<BTreeMap<String, String>>,
}

/// Composes allocator, renderer, dispatcher, and recorder per order.
#[derive(Clone)]
pub struct FulfillmentOrchestrator<S, D, G, M, F> {
    store: S,
    allocator: StockAllocator<S>,
    dispatcher: SideEffectDispatcher<D, G, M>,
    recorder: HistoryRecorder<S>,
    fetcher: F,
}

impl<S, D, G, M, F> FulfillmentOrchestrator<S, D, G, M, F>
where
    S: CatalogStore + Clone + Send + Sync + 'static,
    D: DirectoryService + Clone + Send + Sync + 'static,
    G: DriveService + Clone + Send + Sync + 'static,
    M: MailService + Clone + Send + Sync + 'static,
    F: TemplateFetcher + Clone + Send + Sync + 'static,
{
    /// Creates a new orchestrator over the store and collaborator handles.
    /// `sender` is the outbound-email identity stamped on notifications.
    pub fn new(
        store: S,
        directory: D,
        drive: G,
        mail: M,
        fetcher: F,
        sender: impl Into<String>,
        effect_timeout: Duration,
    ) -> Self {
        Self {
            allocator: StockAllocator::new(store.clone()),
            recorder: HistoryRecorder::new(store.clone()),
            dispatcher: SideEffectDispatcher::new(directory, drive, mail, sender, effect_timeout),
            store,
            fetcher,
        }
    }

    /// Fulfills one unit of an account product: claim a stock row, render
    /// the credential message, notify, record.
    #[tracing::instrument(skip(self, order), fields(product_id = %order.product_id))]
    pub async fn fulfill_account(
        &self,
        order: AccountOrder,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        metrics::counter!("fulfillment_attempts_total", "kind" => "account").increment(1);
        let started = std::time::Instant::now();

        let buyer = BuyerEmail::parse(order.buyer_email.as_str())
            .map_err(|e| FulfillmentError::InvalidPayload(e.to_string()))?;
        let product = self
            .store
            .get_product(order.product_id)
            .await?
            .ok_or(FulfillmentError::ProductNotFound(order.product_id))?;
        if product.kind != ProductKind::Account {
            return Err(FulfillmentError::InvalidPayload(format!(
                "product {} is not an account product",
                product.id
            )));
        }

        let this = self.clone();
        let result =
            run_detached(async move { this.run_account(product, buyer, order.stock_id).await })
                .await;
        finish("account", started, &result);
        result
    }

    /// Fulfills membership products: group invites plus one summary email,
    /// one history row per product.
    #[tracing::instrument(skip(self, order), fields(products = order.product_ids.len()))]
    pub async fn fulfill_membership(
        &self,
        order: MembershipOrder,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        metrics::counter!("fulfillment_attempts_total", "kind" => "membership").increment(1);
        let started = std::time::Instant::now();

        let buyer = BuyerEmail::parse(order.buyer_email.as_str())
            .map_err(|e| FulfillmentError::InvalidPayload(e.to_string()))?;
        if order.product_ids.is_empty() {
            return Err(FulfillmentError::InvalidPayload(
                "no products requested".to_string(),
            ));
        }
        let products = self.store.get_products(&order.product_ids).await?;
        if products.is_empty() {
            return Err(FulfillmentError::ProductNotFound(order.product_ids[0]));
        }

        let this = self.clone();
        let result = run_detached(async move { this.run_membership(products, buyer).await }).await;
        finish("membership", started, &result);
        result
    }

    /// Fulfills link items: drive grants and an idempotent group invite per
    /// category, one grouped email per category, one history row per item.
    #[tracing::instrument(skip(self, order), fields(items = order.item_ids.len()))]
    pub async fn fulfill_links(
        &self,
        order: LinkOrder,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        metrics::counter!("fulfillment_attempts_total", "kind" => "link").increment(1);
        let started = std::time::Instant::now();

        let buyer = BuyerEmail::parse(order.buyer_email.as_str())
            .map_err(|e| FulfillmentError::InvalidPayload(e.to_string()))?;
        if order.item_ids.is_empty() {
            return Err(FulfillmentError::InvalidPayload(
                "no link items requested".to_string(),
            ));
        }
        let items = self.store.get_link_items(&order.item_ids).await?;
        if items.is_empty() {
            return Err(FulfillmentError::ItemsNotFound);
        }

        let this = self.clone();
        let result = run_detached(async move { this.run_links(items, buyer).await }).await;
        finish("link", started, &result);
        result
    }

    async fn run_account(
        &self,
        product: Product,
        buyer: BuyerEmail,
        requested: Option<StockId>,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        let mut progress = Progress::new();

        let unit = self.allocator.allocate(&product, &buyer, requested).await?;
        progress.advance(FulfillmentPhase::Allocated);

        let explicit = product
            .account_config
            .as_ref()
            .and_then(|c| c.template.as_deref());
        let template = self
            .resolve_template(explicit, product.template_url.as_deref(), DEFAULT_ACCOUNT_TEMPLATE)
            .await;
        let message =
            render_account_message(&template, &product, &unit.stock, &unit.transaction_id, &buyer);
        let subject = render_tokens(
            product
                .email_subject
                .as_deref()
                .unwrap_or(DEFAULT_ORDER_SUBJECT),
            &[
                ("{{transaction_id}}", unit.transaction_id.as_str()),
                ("{{product_name}}", product.name.as_str()),
                ("{{buyer_email}}", buyer.as_str()),
            ],
        );
        progress.advance(FulfillmentPhase::Rendered);

        self.dispatcher
            .apply(
                &buyer,
                vec![SideEffect::Email {
                    subject,
                    html_body: message.clone(),
                }],
            )
            .await;
        progress.advance(FulfillmentPhase::SideEffected);

        self.recorder
            .record(
                NewHistoryRecord::success(
                    buyer.as_str(),
                    product.name.as_str(),
                    product.product_code.as_str(),
                    unit.transaction_id.clone(),
                )
                .with_message(message.clone())
                .with_raw_data(unit.stock.account_data.clone()),
            )
            .await;
        progress.advance(FulfillmentPhase::Recorded);

        let receipt = FulfillmentReceipt {
            transaction_id: unit.transaction_id,
            messages: vec![message],
            items: vec![ItemReceipt {
                name: product.name,
                status: HistoryStatus::Success,
            }],
            account_data: Some(unit.stock.account_data),
        };
        progress.advance(FulfillmentPhase::Responded);
        Ok(receipt)
    }

    async fn run_membership(
        &self,
        products: Vec<Product>,
        buyer: BuyerEmail,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        let mut progress = Progress::new();

        // Grant-only allocation: the products themselves are the allocation,
        // with unbounded availability.
        let transaction_id = generate_transaction_id("TRX");
        progress.advance(FulfillmentPhase::Allocated);

        let product_names = products
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        // A single-product order honors that product's template chain; a
        // multi-product order always uses the summary template.
        let (body_template, subject_template) = if let [product] = products.as_slice() {
            (
                self.resolve_template(
                    product.email_body.as_deref(),
                    product.template_url.as_deref(),
                    DEFAULT_ORDER_TEMPLATE,
                )
                .await,
                product
                    .email_subject
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ORDER_SUBJECT.to_string()),
            )
        } else {
            (
                DEFAULT_ORDER_TEMPLATE.to_string(),
                DEFAULT_ORDER_SUBJECT.to_string(),
            )
        };

        let first = &products[0];
        let bindings = [
            ("{{product_names}}", product_names.as_str()),
            ("{{product_name}}", first.name.as_str()),
            ("{{product_code}}", first.product_code.as_str()),
            ("{{transaction_id}}", transaction_id.as_str()),
            ("{{buyer_email}}", buyer.as_str()),
        ];
        let message = render_tokens(&body_template, &bindings);
        let subject = render_tokens(&subject_template, &bindings);
        progress.advance(FulfillmentPhase::Rendered);

        let mut effects: Vec<SideEffect> = products
            .iter()
            .filter_map(|p| {
                p.group_email
                    .as_deref()
                    .filter(|g| !g.is_empty())
                    .map(|group| SideEffect::GroupInvite {
                        group: group.to_string(),
                        role: p.membership_role().to_string(),
                    })
            })
            .collect();
        effects.push(SideEffect::Email {
            subject,
            html_body: message.clone(),
        });
        self.dispatcher.apply(&buyer, effects).await;
        progress.advance(FulfillmentPhase::SideEffected);

        let mut items = Vec::with_capacity(products.len());
        for product in &products {
            self.recorder
                .record(NewHistoryRecord::success(
                    buyer.as_str(),
                    product.name.as_str(),
                    product.product_code.as_str(),
                    transaction_id.clone(),
                ))
                .await;
            items.push(ItemReceipt {
                name: product.name.clone(),
                status: HistoryStatus::Success,
            });
        }
        progress.advance(FulfillmentPhase::Recorded);

        let receipt = FulfillmentReceipt {
            transaction_id,
            messages: vec![message],
            items,
            account_data: None,
        };
        progress.advance(FulfillmentPhase::Responded);
        Ok(receipt)
    }

    async fn run_links(
        &self,
        items: Vec<LinkItem>,
        buyer: BuyerEmail,
    ) -> Result<FulfillmentReceipt, FulfillmentError> {
        let mut progress = Progress::new();

        let transaction_id = generate_transaction_id("LINK");
        progress.advance(FulfillmentPhase::Allocated);

        // Group by category, preserving the order items were supplied in.
        let mut groups: Vec<(LinkCategoryId, Vec<LinkItem>)> = Vec::new();
        for item in items {
            match groups.iter().position(|(id, _)| *id == item.category_id) {
                Some(pos) => groups[pos].1.push(item),
                None => groups.push((item.category_id, vec![item])),
            }
        }

        let mut messages = Vec::with_capacity(groups.len());
        let mut effects = Vec::new();
        for (category_id, bucket) in &groups {
            let category = match self.store.get_link_category(*category_id).await? {
                Some(category) => category,
                None => {
                    // Orphaned items still render; the category tokens fall
                    // back to the missing-value dash.
                    let mut placeholder = LinkCategory::new("");
                    placeholder.id = *category_id;
                    placeholder
                }
            };

            let wrapper = self
                .resolve_template(category.email_body.as_deref(), None, DEFAULT_CATEGORY_TEMPLATE)
                .await;
            let message =
                render_category_email(&wrapper, &category, bucket, &transaction_id, &buyer);
            let subject = render_tokens(
                category
                    .email_subject
                    .as_deref()
                    .unwrap_or(DEFAULT_CATEGORY_SUBJECT),
                &[
                    ("{{category_name}}", category.name.as_str()),
                    ("{{transaction_id}}", transaction_id.as_str()),
                    ("{{buyer_email}}", buyer.as_str()),
                ],
            );

            for item in bucket {
                if let Some(url) = item.drive_url.as_deref().filter(|u| !u.is_empty()) {
                    effects.push(SideEffect::DriveGrant {
                        url: url.to_string(),
                    });
                }
            }
            // One idempotent invite per category, not one per item.
            if let Some(group) = category.group_email.as_deref().filter(|g| !g.is_empty()) {
                effects.push(SideEffect::GroupInvite {
                    group: group.to_string(),
                    role: "MEMBER".to_string(),
                });
            }
            effects.push(SideEffect::Email {
                subject,
                html_body: message.clone(),
            });
            messages.push(message);
        }
        progress.advance(FulfillmentPhase::Rendered);

        self.dispatcher.apply(&buyer, effects).await;
        progress.advance(FulfillmentPhase::SideEffected);

        let mut receipts = Vec::new();
        for (_, bucket) in &groups {
            for item in bucket {
                self.recorder
                    .record(NewHistoryRecord::success(
                        buyer.as_str(),
                        item.name.as_str(),
                        "LINK",
                        transaction_id.clone(),
                    ))
                    .await;
                receipts.push(ItemReceipt {
                    name: item.name.clone(),
                    status: HistoryStatus::Success,
                });
            }
        }
        progress.advance(FulfillmentPhase::Recorded);

        let receipt = FulfillmentReceipt {
            transaction_id,
            messages,
            items: receipts,
            account_data: None,
        };
        progress.advance(FulfillmentPhase::Responded);
        Ok(receipt)
    }

    /// Resolves a template body: explicit field → fetched URL → default.
    /// Evaluated fresh on every call; fetched templates are never cached.
    async fn resolve_template(
        &self,
        explicit: Option<&str>,
        url: Option<&str>,
        default: &str,
    ) -> String {
        if let Some(body) = explicit {
            if !body.trim().is_empty() {
                return body.to_string();
            }
        }

        if let Some(url) = url {
            if !url.trim().is_empty() {
                match self.fetcher.fetch_text(url).await {
                    Ok(text) if !text.trim().is_empty() => return text,
                    Ok(_) => tracing::warn!(%url, "fetched template is empty, using default"),
                    Err(e) => {
                        tracing::warn!(%url, error = %e, "template fetch failed, using default");
                    }
                }
            }
        }

        default.to_string()
    }
}

/// Runs the post-validation stage on a detached task so a dropped caller
/// future cannot cancel it mid-flight.
async fn run_detached<T>(
    fut: impl std::future::Future<Output = Result<T, FulfillmentError>> + Send + 'static,
) -> Result<T, FulfillmentError>
where
    T: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(e) => Err(FulfillmentError::Internal(format!(
            "fulfillment task aborted: {e}"
        ))),
    }
}

fn finish(
    kind: &'static str,
    started: std::time::Instant,
    result: &Result<FulfillmentReceipt, FulfillmentError>,
) {
    metrics::histogram!("fulfillment_duration_seconds").record(started.elapsed().as_secs_f64());
    match result {
        Ok(receipt) => {
            metrics::counter!("fulfillment_completed", "kind" => kind).increment(1);
            tracing::info!(kind, transaction_id = %receipt.transaction_id, "fulfillment completed");
        }
        Err(e) => {
            metrics::counter!("fulfillment_failed", "kind" => kind).increment(1);
            tracing::warn!(kind, error = %e, "fulfillment failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use catalog::{AccountConfig, AccountField, AccountStock, InMemoryCatalogStore};
    use common::ProductId;

    use super::*;
    use crate::services::{
        InMemoryDirectoryService, InMemoryDriveService, InMemoryMailService,
        InMemoryTemplateFetcher,
    };

    type TestOrchestrator = FulfillmentOrchestrator<
        InMemoryCatalogStore,
        InMemoryDirectoryService,
        InMemoryDriveService,
        InMemoryMailService,
        InMemoryTemplateFetcher,
    >;

    struct Harness {
        orchestrator: TestOrchestrator,
        store: InMemoryCatalogStore,
        directory: InMemoryDirectoryService,
        drive: InMemoryDriveService,
        mail: InMemoryMailService,
        fetcher: InMemoryTemplateFetcher,
    }

    fn setup() -> Harness {
        let store = InMemoryCatalogStore::new();
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
            "\"SuperApp Admin\" <admin@superapp.example>",
            Duration::from_secs(5),
        );
        Harness {
            orchestrator,
            store,
            directory,
            drive,
            mail,
            fetcher,
        }
    }

    fn nfx_product() -> Product {
        let mut product = Product::new("Netflix Premium", "NFX-01", ProductKind::Account);
        product.prefix_code = Some("NFX".to_string());
        product.account_config = Some(AccountConfig {
            fields: vec![AccountField::text("Email"), AccountField::text("Password")],
            template: None,
        });
        product
    }

    fn nfx_stock(product_id: ProductId) -> AccountStock {
        let mut data = BTreeMap::new();
        data.insert("Email".to_string(), "a@x.com".to_string());
        data.insert("Password".to_string(), "p1".to_string());
        AccountStock::available(product_id, data)
    }

    async fn seed_account(h: &Harness) -> (Product, AccountStock) {
        let product = nfx_product();
        let stock = nfx_stock(product.id);
        h.store.insert_product(product.clone()).await.unwrap();
        h.store.insert_stock(stock.clone()).await.unwrap();
        (product, stock)
    }

    fn account_order(product: &Product) -> AccountOrder {
        AccountOrder {
            buyer_email: "b@y.com".to_string(),
            product_id: product.id,
            stock_id: None,
        }
    }

    #[tokio::test]
    async fn account_happy_path_claims_renders_and_records() {
        let h = setup();
        let (product, stock) = seed_account(&h).await;

        let receipt = h
            .orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();

        // Transaction id: prefix + long uppercase alphanumeric suffix.
        let id = receipt.transaction_id.as_str();
        let suffix = id.strip_prefix("NFX-").unwrap();
        assert!(suffix.len() >= 7);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));

        // Rendered message carries the credentials, not the tokens.
        assert_eq!(receipt.messages.len(), 1);
        assert!(receipt.messages[0].contains("a@x.com"));
        assert!(receipt.messages[0].contains("p1"));
        assert!(!receipt.messages[0].contains("{Email}"));

        // Stock transitioned exactly once.
        let row = h.store.stock_by_id(stock.id).await.unwrap();
        assert!(row.is_sold);
        assert_eq!(row.sold_to.as_deref(), Some("b@y.com"));

        // One history row with the raw-data backup, one email.
        assert_eq!(h.store.history_count().await, 1);
        let history = h.store.recent_history(1).await.unwrap();
        assert_eq!(history[0].raw_data.as_ref().unwrap()["Email"], "a@x.com");
        assert_eq!(h.mail.sent_count(), 1);
    }

    #[tokio::test]
    async fn out_of_stock_mutates_nothing() {
        let h = setup();
        let product = nfx_product();
        h.store.insert_product(product.clone()).await.unwrap();

        let result = h.orchestrator.fulfill_account(account_order(&product)).await;

        assert!(matches!(result, Err(FulfillmentError::OutOfStock(_))));
        assert_eq!(h.store.history_count().await, 0);
        assert_eq!(h.mail.sent_count(), 0);
    }

    #[tokio::test]
    async fn discrete_claim_on_just_sold_unit_is_unavailable() {
        let h = setup();
        let (product, stock) = seed_account(&h).await;

        // A concurrent buyer wins the unit first.
        h.orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();

        let result = h
            .orchestrator
            .fulfill_account(AccountOrder {
                buyer_email: "late@y.com".to_string(),
                product_id: product.id,
                stock_id: Some(stock.id),
            })
            .await;

        assert!(matches!(
            result,
            Err(FulfillmentError::StockUnavailable(id)) if id == stock.id
        ));
        // Only the first sale recorded.
        assert_eq!(h.store.history_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_buyer_is_rejected_before_any_state_change() {
        let h = setup();
        let (product, _) = seed_account(&h).await;

        let result = h
            .orchestrator
            .fulfill_account(AccountOrder {
                buyer_email: "not-an-email".to_string(),
                product_id: product.id,
                stock_id: None,
            })
            .await;

        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
        assert_eq!(h.store.history_count().await, 0);
        let rows = h.store.list_stock(product.id).await.unwrap();
        assert!(rows.iter().all(|s| !s.is_sold));
    }

    #[tokio::test]
    async fn account_order_on_manual_product_is_rejected() {
        let h = setup();
        let product = Product::new("VIP Group", "VIP-01", ProductKind::Manual);
        h.store.insert_product(product.clone()).await.unwrap();

        let result = h.orchestrator.fulfill_account(account_order(&product)).await;
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn unknown_product_is_not_found() {
        let h = setup();
        let result = h
            .orchestrator
            .fulfill_account(AccountOrder {
                buyer_email: "b@y.com".to_string(),
                product_id: ProductId::new(),
                stock_id: None,
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn explicit_template_beats_url_and_default() {
        let h = setup();
        let mut product = nfx_product();
        product.account_config = Some(AccountConfig {
            fields: vec![AccountField::text("Email")],
            template: Some("login={Email} trx={Transaction ID}".to_string()),
        });
        product.template_url = Some("https://cdn.example.com/t.txt".to_string());
        h.fetcher
            .insert("https://cdn.example.com/t.txt", "fetched {Email}");
        h.store.insert_product(product.clone()).await.unwrap();
        h.store.insert_stock(nfx_stock(product.id)).await.unwrap();

        let receipt = h
            .orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();

        assert!(receipt.messages[0].starts_with("login=a@x.com"));
    }

    #[tokio::test]
    async fn template_url_is_fetched_when_no_explicit_body() {
        let h = setup();
        let mut product = nfx_product();
        product.template_url = Some("https://cdn.example.com/t.txt".to_string());
        h.fetcher
            .insert("https://cdn.example.com/t.txt", "fetched email={Email}");
        h.store.insert_product(product.clone()).await.unwrap();
        h.store.insert_stock(nfx_stock(product.id)).await.unwrap();

        let receipt = h
            .orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();
        assert_eq!(receipt.messages[0], "fetched email=a@x.com");
    }

    #[tokio::test]
    async fn failed_template_fetch_falls_back_to_default() {
        let h = setup();
        let mut product = nfx_product();
        product.template_url = Some("https://cdn.example.com/t.txt".to_string());
        h.fetcher.set_fail_on_fetch(true);
        h.store.insert_product(product.clone()).await.unwrap();
        h.store.insert_stock(nfx_stock(product.id)).await.unwrap();

        let receipt = h
            .orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();
        assert!(receipt.messages[0].contains("Terimakasih sudah membeli"));
        assert!(receipt.messages[0].contains("a@x.com"));
    }

    #[tokio::test]
    async fn mail_failure_does_not_fail_the_sale() {
        let h = setup();
        let (product, stock) = seed_account(&h).await;
        h.mail.set_fail_on_send(true);

        let receipt = h
            .orchestrator
            .fulfill_account(account_order(&product))
            .await
            .unwrap();

        assert!(receipt.transaction_id.as_str().starts_with("NFX-"));
        let row = h.store.stock_by_id(stock.id).await.unwrap();
        assert!(row.is_sold);
        assert_eq!(h.mail.sent_count(), 0);
        // History still written: the sale is final.
        assert_eq!(h.store.history_count().await, 1);
    }

    #[tokio::test]
    async fn membership_order_invites_and_records_per_product() {
        let h = setup();
        let mut p1 = Product::new("VIP Group", "VIP-01", ProductKind::Manual);
        p1.group_email = Some("vip@groups.example.com".to_string());
        let mut p2 = Product::new("Beta Group", "BETA-01", ProductKind::Manual);
        p2.group_email = Some("beta@groups.example.com".to_string());
        p2.role = Some("MANAGER".to_string());
        h.store.insert_product(p1.clone()).await.unwrap();
        h.store.insert_product(p2.clone()).await.unwrap();

        let receipt = h
            .orchestrator
            .fulfill_membership(MembershipOrder {
                buyer_email: "b@y.com".to_string(),
                product_ids: vec![p1.id, p2.id],
            })
            .await
            .unwrap();

        assert!(receipt.transaction_id.as_str().starts_with("TRX-"));
        assert_eq!(receipt.items.len(), 2);
        assert_eq!(receipt.messages.len(), 1);
        assert!(receipt.messages[0].contains("VIP Group, Beta Group"));

        assert!(h.directory.is_member("vip@groups.example.com", "b@y.com"));
        assert!(h.directory.is_member("beta@groups.example.com", "b@y.com"));
        assert_eq!(h.mail.sent_count(), 1);
        assert_eq!(h.store.history_count().await, 2);
    }

    #[tokio::test]
    async fn existing_membership_still_fulfills() {
        let h = setup();
        let mut product = Product::new("VIP Group", "VIP-01", ProductKind::Manual);
        product.group_email = Some("vip@groups.example.com".to_string());
        h.store.insert_product(product.clone()).await.unwrap();
        h.directory
            .insert_member("vip@groups.example.com", "b@y.com", "MEMBER")
            .await
            .unwrap();

        let receipt = h
            .orchestrator
            .fulfill_membership(MembershipOrder {
                buyer_email: "b@y.com".to_string(),
                product_ids: vec![product.id],
            })
            .await
            .unwrap();

        assert_eq!(receipt.items.len(), 1);
        assert_eq!(h.directory.member_count("vip@groups.example.com"), 1);
        assert_eq!(h.store.history_count().await, 1);
    }

    #[tokio::test]
    async fn link_order_groups_messages_per_category() {
        let h = setup();
        let mut ps1 = LinkCategory::new("PS1 Classics");
        ps1.group_email = Some("ps1@groups.example.com".to_string());
        let ps2 = LinkCategory::new("PS2 Archive");
        h.store.insert_link_category(ps1.clone()).await.unwrap();
        h.store.insert_link_category(ps2.clone()).await.unwrap();

        let mut a = LinkItem::new(ps1.id, "Game A");
        a.drive_url =
            Some("https://drive.google.com/file/d/1234567890123456789012345A/view".to_string());
        let b = LinkItem::new(ps1.id, "Game B");
        let c = LinkItem::new(ps2.id, "Game C");
        h.store.insert_link_item(a.clone()).await.unwrap();
        h.store.insert_link_item(b.clone()).await.unwrap();
        h.store.insert_link_item(c.clone()).await.unwrap();

        let receipt = h
            .orchestrator
            .fulfill_links(LinkOrder {
                buyer_email: "b@y.com".to_string(),
                item_ids: vec![a.id, b.id, c.id],
            })
            .await
            .unwrap();

        assert!(receipt.transaction_id.as_str().starts_with("LINK-"));

        // Exactly one message per category, items in supplied order.
        assert_eq!(receipt.messages.len(), 2);
        let ps1_message = &receipt.messages[0];
        assert!(ps1_message.contains("Game A"));
        assert!(ps1_message.contains("Game B"));
        assert!(!ps1_message.contains("Game C"));
        assert!(ps1_message.find("Game A").unwrap() < ps1_message.find("Game B").unwrap());
        let ps2_message = &receipt.messages[1];
        assert!(ps2_message.contains("Game C"));
        assert!(!ps2_message.contains("Game A"));

        // Side effects: one drive grant, one idempotent group invite for
        // PS1, one email per category.
        assert_eq!(h.drive.grant_count(), 1);
        assert_eq!(h.directory.member_count("ps1@groups.example.com"), 1);
        assert_eq!(h.mail.sent_count(), 2);

        // One history row per item, all sharing the transaction id.
        assert_eq!(h.store.history_count().await, 3);
        let history = h.store.recent_history(10).await.unwrap();
        assert!(history
            .iter()
            .all(|r| r.generated_id == receipt.transaction_id));
        assert!(history.iter().all(|r| r.product_code == "LINK"));
    }

    #[tokio::test]
    async fn link_order_with_unknown_items_only_is_not_found() {
        let h = setup();
        let result = h
            .orchestrator
            .fulfill_links(LinkOrder {
                buyer_email: "b@y.com".to_string(),
                item_ids: vec![LinkItemId::new()],
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::ItemsNotFound)));
    }

    #[tokio::test]
    async fn empty_orders_are_invalid() {
        let h = setup();

        let result = h
            .orchestrator
            .fulfill_membership(MembershipOrder {
                buyer_email: "b@y.com".to_string(),
                product_ids: vec![],
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));

        let result = h
            .orchestrator
            .fulfill_links(LinkOrder {
                buyer_email: "b@y.com".to_string(),
                item_ids: vec![],
            })
            .await;
        assert!(matches!(result, Err(FulfillmentError::InvalidPayload(_))));
    }
}
