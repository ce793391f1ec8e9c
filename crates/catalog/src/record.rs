//! Catalog record types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{LinkCategoryId, LinkItemId, ProductId, StockId, TransactionId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a product is fulfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    /// Directory-group membership grant; unbounded availability.
    Manual,
    /// Download/shared-drive link bundle; unbounded availability.
    Link,
    /// Stock-backed account credentials; one stock row per sale.
    Account,
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductKind::Manual => write!(f, "manual"),
            ProductKind::Link => write!(f, "link"),
            ProductKind::Account => write!(f, "account"),
        }
    }
}

/// Input kind of an account credential field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Password,
    Date,
    Number,
}

/// A single credential field descriptor of an account product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
}

impl AccountField {
    /// Creates a field descriptor.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Creates a plain text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }
}

// Legacy rows store a field as a bare string; normalize to a text field.
impl<'de> Deserialize<'de> for AccountField {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Name(String),
            Full {
                name: String,
                #[serde(rename = "type", default)]
                kind: FieldKind,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Name(name) => AccountField::text(name),
            Repr::Full { name, kind } => AccountField::new(name, kind),
        })
    }
}

/// Per-product configuration of an account product: the ordered credential
/// fields each stock row must carry, and an optional message template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub fields: Vec<AccountField>,
    #[serde(default)]
    pub template: Option<String>,
}

/// A sellable catalog entry. Read-only to the fulfillment core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub product_code: String,
    pub kind: ProductKind,
    pub group_email: Option<String>,
    pub prefix_code: Option<String>,
    pub role: Option<String>,
    pub account_config: Option<AccountConfig>,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
    pub template_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    /// Creates a product of the given kind with a fresh id.
    pub fn new(name: impl Into<String>, product_code: impl Into<String>, kind: ProductKind) -> Self {
        Self {
            id: ProductId::new(),
            name: name.into(),
            product_code: product_code.into(),
            kind,
            group_email: None,
            prefix_code: None,
            role: None,
            account_config: None,
            email_subject: None,
            email_body: None,
            template_url: None,
            created_at: Utc::now(),
        }
    }

    /// The transaction-id prefix for sales of this product.
    pub fn transaction_prefix(&self) -> &str {
        self.prefix_code
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or("TRX")
    }

    /// The directory role granted with this product's group membership.
    pub fn membership_role(&self) -> &str {
        self.role
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or("MEMBER")
    }
}

/// One sellable unit of an account product.
///
/// Once `is_sold` transitions to true it never reverts; the row is never
/// physically deleted after sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStock {
    pub id: StockId,
    pub product_id: ProductId,
    pub account_data: BTreeMap<String, String>,
    pub is_sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
    pub sold_to: Option<String>,
    pub transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
}

impl AccountStock {
    /// Creates an available (unsold) stock row for a product.
    pub fn available(product_id: ProductId, account_data: BTreeMap<String, String>) -> Self {
        Self {
            id: StockId::new(),
            product_id,
            account_data,
            is_sold: false,
            sold_at: None,
            sold_to: None,
            transaction_id: None,
            created_at: Utc::now(),
        }
    }
}

/// Groups link items sharing a notification template and an optional
/// directory group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkCategory {
    pub id: LinkCategoryId,
    pub name: String,
    pub group_email: Option<String>,
    pub email_subject: Option<String>,
    pub email_body: Option<String>,
}

impl LinkCategory {
    /// Creates a category with a fresh id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: LinkCategoryId::new(),
            name: name.into(),
            group_email: None,
            email_subject: None,
            email_body: None,
        }
    }
}

/// A purchasable link carrying a direct download URL and/or a shared-drive
/// URL. No sold/unsold state; access is additive and idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkItem {
    pub id: LinkItemId,
    pub category_id: LinkCategoryId,
    pub name: String,
    pub download_url: Option<String>,
    pub drive_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LinkItem {
    /// Creates a link item in a category with a fresh id.
    pub fn new(category_id: LinkCategoryId, name: impl Into<String>) -> Self {
        Self {
            id: LinkItemId::new(),
            category_id,
            name: name.into(),
            download_url: None,
            drive_url: None,
            created_at: Utc::now(),
        }
    }
}

/// Outcome recorded for a fulfilled line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Success,
    Failure,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Success => write!(f, "SUCCESS"),
            HistoryStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Append-only audit entry for one fulfilled line item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Uuid,
    pub buyer_email: String,
    pub product_name: String,
    pub product_code: String,
    pub generated_id: TransactionId,
    pub status: HistoryStatus,
    pub message: Option<String>,
    pub raw_data: Option<BTreeMap<String, String>>,
    pub created_at: DateTime<Utc>,
}

/// A history entry to be appended; id and timestamp are assigned on insert.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub buyer_email: String,
    pub product_name: String,
    pub product_code: String,
    pub generated_id: TransactionId,
    pub status: HistoryStatus,
    pub message: Option<String>,
    pub raw_data: Option<BTreeMap<String, String>>,
}

impl NewHistoryRecord {
    /// Creates a SUCCESS entry with no message payload.
    pub fn success(
        buyer_email: impl Into<String>,
        product_name: impl Into<String>,
        product_code: impl Into<String>,
        generated_id: TransactionId,
    ) -> Self {
        Self {
            buyer_email: buyer_email.into(),
            product_name: product_name.into(),
            product_code: product_code.into(),
            generated_id,
            status: HistoryStatus::Success,
            message: None,
            raw_data: None,
        }
    }

    /// Attaches the rendered notification message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attaches a backup of the allocated account data.
    pub fn with_raw_data(mut self, raw_data: BTreeMap<String, String>) -> Self {
        self.raw_data = Some(raw_data);
        self
    }

    /// Materializes the record with a fresh id and the current timestamp.
    pub fn into_record(self) -> HistoryRecord {
        HistoryRecord {
            id: Uuid::new_v4(),
            buyer_email: self.buyer_email,
            product_name: self.product_name,
            product_code: self.product_code,
            generated_id: self.generated_id,
            status: self.status,
            message: self.message,
            raw_data: self.raw_data,
            created_at: Utc::now(),
        }
    }
}
