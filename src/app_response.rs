use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// JSON envelope returned by every C ABI function.
#[derive(Debug, Serialize, Deserialize)]
pub enum AppResponse {
    StorageUnavailable(String),
    DuplicateKey(String),
    ConstraintError(String),
    TransactionFailed(String),
    SubscriptionInvalid(String),
    NotFound(String),
    ValidationError(String),
    SerializationError(String),
    BadRequest(String),
    Closed(String),
    Ok(String),
}

impl Display for AppResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AppResponse::StorageUnavailable(msg) => write!(f, "Storage unavailable: {}", msg),
            AppResponse::DuplicateKey(msg) => write!(f, "Duplicate key: {}", msg),
            AppResponse::ConstraintError(msg) => write!(f, "Constraint error: {}", msg),
            AppResponse::TransactionFailed(msg) => write!(f, "Transaction failed: {}", msg),
            AppResponse::SubscriptionInvalid(msg) => write!(f, "Subscription invalid: {}", msg),
            AppResponse::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppResponse::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppResponse::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            AppResponse::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            AppResponse::Closed(msg) => write!(f, "Closed: {}", msg),
            AppResponse::Ok(msg) => write!(f, "Ok: {}", msg),
        }
    }
}

impl From<StoreError> for AppResponse {
    fn from(err: StoreError) -> Self {
        let msg = err.to_string();
        match err {
            StoreError::StorageUnavailable(_) => AppResponse::StorageUnavailable(msg),
            StoreError::DuplicateKey { .. } => AppResponse::DuplicateKey(msg),
            StoreError::UniqueViolation { .. } => AppResponse::ConstraintError(msg),
            StoreError::TransactionFailed(_) => AppResponse::TransactionFailed(msg),
            StoreError::SubscriptionInvalid(_) => AppResponse::SubscriptionInvalid(msg),
            StoreError::UnknownCollection(_) | StoreError::UnknownIndex { .. } => AppResponse::NotFound(msg),
            StoreError::Validation { .. } | StoreError::InvalidRange(_) => AppResponse::ValidationError(msg),
            StoreError::Serialization(_) => AppResponse::SerializationError(msg),
            StoreError::Closed(_) => AppResponse::Closed(msg),
            StoreError::OutOfScope(_) | StoreError::ReadOnly | StoreError::Config(_) => {
                AppResponse::BadRequest(msg)
            }
        }
    }
}

impl From<serde_json::Error> for AppResponse {
    fn from(err: serde_json::Error) -> Self {
        AppResponse::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl AppResponse {
    pub fn success(msg: impl Into<String>) -> Self {
        AppResponse::Ok(msg.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AppResponse::Ok(_))
    }
}
