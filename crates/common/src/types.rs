use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a catalog product.
    ProductId
}

uuid_id! {
    /// Unique identifier for an account stock row.
    StockId
}

uuid_id! {
    /// Unique identifier for a link category.
    LinkCategoryId
}

uuid_id! {
    /// Unique identifier for a link item.
    LinkItemId
}

/// Human-readable transaction identifier binding a sale's allocation,
/// rendered message, and history records together (e.g. `NFX-A2K9Q7X01B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Wraps an already-formatted transaction identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for TransactionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Error returned when a buyer email fails the shape check.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid buyer email: {0:?}")]
pub struct InvalidBuyerEmail(pub String);

/// A buyer's email address, checked for basic shape at the boundary.
///
/// The check is intentionally shallow (non-empty local part and domain);
/// deliverability is the mail collaborator's problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerEmail(String);

impl BuyerEmail {
    /// Parses a buyer email, rejecting obviously malformed input.
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidBuyerEmail> {
        let raw = raw.into();
        let trimmed = raw.trim();
        match trimmed.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(Self(trimmed.to_string()))
            }
            _ => Err(InvalidBuyerEmail(raw)),
        }
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BuyerEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for BuyerEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_id_new_creates_unique_ids() {
        let id1 = ProductId::new();
        let id2 = ProductId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn stock_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = StockId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn id_serialization_roundtrip() {
        let id = LinkItemId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: LinkItemId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn transaction_id_string_conversion() {
        let id = TransactionId::new("NFX-A2K9Q7X01B");
        assert_eq!(id.as_str(), "NFX-A2K9Q7X01B");

        let id2: TransactionId = "TRX-0000000".into();
        assert_eq!(id2.as_str(), "TRX-0000000");
    }

    #[test]
    fn buyer_email_accepts_plain_addresses() {
        let email = BuyerEmail::parse("buyer@example.com").unwrap();
        assert_eq!(email.as_str(), "buyer@example.com");
    }

    #[test]
    fn buyer_email_trims_whitespace() {
        let email = BuyerEmail::parse("  buyer@example.com ").unwrap();
        assert_eq!(email.as_str(), "buyer@example.com");
    }

    #[test]
    fn buyer_email_rejects_malformed_input() {
        assert!(BuyerEmail::parse("").is_err());
        assert!(BuyerEmail::parse("no-at-sign").is_err());
        assert!(BuyerEmail::parse("@no-local").is_err());
        assert!(BuyerEmail::parse("no-domain@").is_err());
        assert!(BuyerEmail::parse("two@@ats").is_err());
    }
}
