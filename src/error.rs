//! Error type shared by every store operation.

use thiserror::Error;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything that can go wrong between a caller and the LMDB environment.
///
/// Engine failures inside a transaction surface as [`StoreError::TransactionFailed`];
/// data-level failures raised by a transaction body (duplicate keys, unique index
/// collisions, invalid records) are returned unchanged so callers can match on them.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The environment could not be opened, is corrupted, or has a newer schema.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("duplicate key {key} in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("unique index '{index}' on '{collection}' already holds key {key}")]
    UniqueViolation {
        collection: String,
        index: String,
        key: String,
    },

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    /// The access gate refused the call.
    #[error("subscription invalid: {0}")]
    SubscriptionInvalid(String),

    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    #[error("unknown index '{index}' on collection '{collection}'")]
    UnknownIndex { collection: String, index: String },

    #[error("collection '{0}' is not part of this transaction's scope")]
    OutOfScope(String),

    #[error("cannot write inside a read-only transaction")]
    ReadOnly,

    #[error("invalid record for '{collection}': {reason}")]
    Validation { collection: String, reason: String },

    #[error("invalid key range: {0}")]
    InvalidRange(String),

    /// The handle was invalidated, usually by a newer schema version.
    #[error("database connection closed: {0}")]
    Closed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<lmdb::Error> for StoreError {
    fn from(err: lmdb::Error) -> Self {
        StoreError::TransactionFailed(err.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(err: toml::de::Error) -> Self {
        StoreError::Config(err.to_string())
    }
}

impl StoreError {
    pub(crate) fn validation(collection: &str, reason: impl Into<String>) -> Self {
        StoreError::Validation {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    /// Storage-level failure while opening or migrating.
    pub(crate) fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::StorageUnavailable(format!("{context}: {err}"))
    }
}
