use thiserror::Error;

/// Errors that can occur when interacting with the catalog store.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An insert or update violated a unique constraint.
    ///
    /// For the stock-claim write this signals a transaction-id collision,
    /// which callers treat as retryable.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },
}

/// Result type for catalog store operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
