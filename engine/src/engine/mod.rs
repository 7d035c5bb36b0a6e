//! Storage engines.
//!
//! An [`Engine`] persists documents for named collections. Collections and
//! connectors only ever talk to this trait, so either backend can sit behind
//! the same API:
//!
//! - [`StructuredStoreEngine`] - one SQLite table per collection, with indexes
//!   derived from the schema and a version bump per registered collection
//! - [`FlatStoreEngine`] - one JSON array per collection in a key-value store

mod flat;
mod index;
mod structured;

pub use flat::FlatStoreEngine;
pub use index::{derive_index_spec, IndexDef, IndexSpec, KeyPath};
pub use structured::StructuredStoreEngine;

use crate::{error::Result, Criteria, Document};
use async_trait::async_trait;
use serde_json::Value;

/// Contract every storage backend implements.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Prepare the backend for use.
    async fn initialize(&self) -> Result<()>;

    /// Persist a new document and return its stored shape.
    async fn create(&self, collection: &str, data: Document) -> Result<Document>;

    /// Return all documents whose fields equal every criterion.
    /// Empty criteria match everything.
    async fn find(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>>;

    /// Shallow-merge `data` over the stored document it addresses.
    async fn update(&self, collection: &str, data: Document) -> Result<Document>;

    /// Remove the given documents. The engine extracts its own identifiers.
    async fn delete(&self, collection: &str, records: &[Document]) -> Result<()>;
}

/// Exact JSON equality over every criterion (logical AND).
pub(crate) fn matches_criteria(document: &Document, criteria: &Criteria) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| document.get(field) == Some(expected))
}

/// Shallow merge: every key of `patch` overwrites the stored value.
pub(crate) fn merge(mut existing: Document, patch: Document) -> Document {
    for (field, value) in patch {
        existing.insert(field, value);
    }
    existing
}

/// Falsy key values (`null`, `false`, `0`, `""`) never address a record.
pub(crate) fn is_addressable(key: &Value) -> bool {
    match key {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn criteria_are_conjunctive() {
        let d = doc(json!({"a": 1, "b": "x", "c": null}));
        assert!(matches_criteria(&d, &Criteria::new()));
        assert!(matches_criteria(&d, &doc(json!({"a": 1, "b": "x"}))));
        assert!(!matches_criteria(&d, &doc(json!({"a": 1, "b": "y"}))));
        assert!(matches_criteria(&d, &doc(json!({"c": null}))));
        // a missing field is not equal to null
        assert!(!matches_criteria(&d, &doc(json!({"d": null}))));
    }

    #[test]
    fn merge_keeps_untouched_fields() {
        let merged = merge(
            doc(json!({"id": 1, "name": "Old", "email": "a@x.com"})),
            doc(json!({"id": 1, "name": "New"})),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"id": 1, "name": "New", "email": "a@x.com"})
        );
    }

    #[test]
    fn falsy_keys_are_not_addressable() {
        for key in [json!(null), json!(false), json!(0), json!(0.0), json!("")] {
            assert!(!is_addressable(&key), "{}", key);
        }
        for key in [json!(1), json!("a"), json!(true), json!(-3)] {
            assert!(is_addressable(&key), "{}", key);
        }
    }
}
