//! Error types for the stowage engine.

use crate::{schema::FieldError, CollectionName};
use thiserror::Error;

/// Failures reported by a storage substrate.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt record data: {0}")]
    Json(#[from] serde_json::Error),
}

/// All possible errors from the stowage engine.
#[derive(Debug, Error)]
pub enum Error {
    // Definition errors
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    // Validation and constraint errors
    #[error("validation failed for '{collection}': {}", summarize(.errors))]
    Validation {
        collection: CollectionName,
        errors: Vec<FieldError>,
    },

    #[error("unique constraint violated in '{collection}': {field} = {value}")]
    UniqueConstraint {
        collection: CollectionName,
        field: String,
        value: serde_json::Value,
    },

    #[error("record not found in '{collection}': {key}")]
    NotFound {
        collection: CollectionName,
        key: String,
    },

    #[error("collection '{collection}' has no primary key")]
    PrimaryKeyRequired { collection: CollectionName },

    #[error("payload for '{collection}' is missing primary key '{field}'")]
    MissingPrimaryKeyValue {
        collection: CollectionName,
        field: String,
    },

    // Engine state errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("invalid key for '{collection}': {reason}")]
    InvalidKey {
        collection: CollectionName,
        reason: String,
    },

    #[error("engine unavailable: database handle is {state}")]
    EngineUnavailable { state: &'static str },

    // Substrate errors
    #[error("{operation} on '{collection}' failed: {source}")]
    Backend {
        collection: CollectionName,
        operation: &'static str,
        #[source]
        source: BackendError,
    },
}

impl Error {
    /// Wrap a substrate failure, logging it with its collection and operation.
    pub(crate) fn backend(
        collection: impl Into<CollectionName>,
        operation: &'static str,
        source: impl Into<BackendError>,
    ) -> Self {
        let collection = collection.into();
        let source = source.into();
        tracing::error!(collection = %collection, operation, error = %source, "Backend operation failed");
        Error::Backend {
            collection,
            operation,
            source,
        }
    }

    /// Field errors carried by a validation failure, if any.
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            Error::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| match &e.field {
            Some(field) => format!("{}: {}", field, e.error),
            None => e.error.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
