//! Error types and result types for collection and query operations.
//!
//! Every fallible operation in the workspace returns [`StoreResult<T>`]. Backends map their
//! native failures into [`StoreError`] so callers can match on the failure class without
//! knowing which backend is active.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Serialization/deserialization error when converting items to or from their stored form.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during backend construction or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// The backend was used before its asynchronous initialization completed.
    #[error("Backend not initialized: {0}")]
    NotInitialized(String),
    /// An item with the given key already exists in the collection.
    #[error("Item {key} already exists in collection {collection}")]
    DuplicateKey {
        /// Display form of the colliding key.
        key: String,
        /// Collection the insert targeted.
        collection: String,
    },
    /// No item with the given key exists in the collection.
    #[error("Item {key} not found in collection {collection}")]
    NotFound {
        /// Display form of the missing key.
        key: String,
        /// Collection the operation targeted.
        collection: String,
    },
    /// The backend cannot express the requested predicate shape or operation combination.
    #[error("Unsupported operation on {backend} backend: {message}")]
    UnsupportedOperation {
        /// Name of the backend that rejected the operation.
        backend: String,
        /// What was rejected and, where possible, what to do instead.
        message: String,
    },
    /// The operation sequence is malformed regardless of backend (e.g. `then_by` without `order_by`).
    #[error("Invalid operation on {backend} backend: {message}")]
    InvalidOperation {
        /// Name of the backend that detected the problem.
        backend: String,
        /// Description of the malformed composition.
        message: String,
    },
    /// A native failure reported by the underlying store (transport, throttling, validation).
    #[error("Backend error from {backend}: {message}")]
    Backend {
        /// Name of the backend that failed.
        backend: String,
        /// The native error message.
        message: String,
    },
    /// A scalar terminal operation observed a cancelled signal before executing.
    #[error("Operation cancelled")]
    Cancelled,
}

impl StoreError {
    pub fn unsupported(backend: &str, message: impl Into<String>) -> Self {
        StoreError::UnsupportedOperation {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid(backend: &str, message: impl Into<String>) -> Self {
        StoreError::InvalidOperation {
            backend: backend.to_string(),
            message: message.into(),
        }
    }

    pub fn backend(backend: &str, message: impl ToString) -> Self {
        StoreError::Backend {
            backend: backend.to_string(),
            message: message.to_string(),
        }
    }

    pub fn duplicate_key(key: impl ToString, collection: &str) -> Self {
        StoreError::DuplicateKey {
            key: key.to_string(),
            collection: collection.to_string(),
        }
    }

    pub fn not_found(key: impl ToString, collection: &str) -> Self {
        StoreError::NotFound {
            key: key.to_string(),
            collection: collection.to_string(),
        }
    }

    /// Returns `true` for the duplicate-key class.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    /// Returns `true` for the not-found class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A specialized `Result` type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<BsonError> for StoreError {
    fn from(err: BsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for StoreError {
    fn from(err: SerdeJsonError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
