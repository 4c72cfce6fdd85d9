use common::{OrderId, Version};
use thiserror::Error;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// The stored version was not exactly one less than the incoming version.
    #[error(
        "Version conflict for order {order_id}: expected stored version {expected}, found {actual}"
    )]
    VersionConflict {
        order_id: OrderId,
        expected: Version,
        actual: Version,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderStoreError {
    /// Returns true for a version conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrderStoreError::VersionConflict { .. })
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
