//! Flat key-value store engine.
//!
//! Each collection is one JSON array stored under `"<namespace>:<collection>"`.
//! There is no indexing: every operation rehydrates the whole array, and
//! every write serializes it back.

use super::{matches_criteria, merge, Engine};
use crate::keys::KeyGenerator;
use crate::kv::{KeyValueStore, MemoryKeyValueStore};
use crate::schema::FieldType;
use crate::{error::Result, Criteria, Document, Error};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Identifier field used by the flat backend.
pub const ID_FIELD: &str = "id";

/// Engine storing each collection as a serialized array of documents.
pub struct FlatStoreEngine {
    namespace: String,
    store: Arc<dyn KeyValueStore>,
    keys: KeyGenerator,
    /// Serializes read-modify-write cycles on the array.
    writes: Mutex<()>,
}

impl std::fmt::Debug for FlatStoreEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatStoreEngine")
            .field("namespace", &self.namespace)
            .field("keys", &self.keys)
            .finish()
    }
}

impl FlatStoreEngine {
    /// Flat engine over a fresh in-memory store.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::with_store(namespace, Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn with_store(namespace: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            namespace: namespace.into(),
            store,
            keys: KeyGenerator::default(),
            writes: Mutex::new(()),
        }
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Storage key for a collection.
    pub fn storage_key(&self, collection: &str) -> String {
        format!("{}:{}", self.namespace, collection)
    }

    /// Load a collection; `None` when its key has never been written.
    fn load(&self, collection: &str, operation: &'static str) -> Result<Option<Vec<Document>>> {
        let raw = self
            .store
            .get(&self.storage_key(collection))
            .map_err(|e| Error::backend(collection, operation, e))?;
        raw.map(|raw| {
            serde_json::from_str(&raw).map_err(|e| Error::backend(collection, operation, e))
        })
        .transpose()
    }

    fn save(&self, collection: &str, operation: &'static str, records: &[Document]) -> Result<()> {
        let raw =
            serde_json::to_string(records).map_err(|e| Error::backend(collection, operation, e))?;
        self.store
            .set(&self.storage_key(collection), &raw)
            .map_err(|e| Error::backend(collection, operation, e))
    }
}

#[async_trait]
impl Engine for FlatStoreEngine {
    async fn initialize(&self) -> Result<()> {
        tracing::debug!(namespace = %self.namespace, "Flat store ready");
        Ok(())
    }

    async fn create(&self, collection: &str, mut data: Document) -> Result<Document> {
        let _guard = self.writes.lock().await;
        let mut records = self.load(collection, "create")?.unwrap_or_default();

        if data.get(ID_FIELD).map_or(true, Value::is_null) {
            data.insert(ID_FIELD.to_string(), self.keys.generate(&FieldType::String));
        }
        records.push(data.clone());
        self.save(collection, "create", &records)?;

        tracing::debug!(collection, id = %data[ID_FIELD], count = records.len(), "Appended record");
        Ok(data)
    }

    async fn find(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>> {
        let records = self.load(collection, "find")?.unwrap_or_default();
        if criteria.is_empty() {
            return Ok(records);
        }
        Ok(records
            .into_iter()
            .filter(|r| matches_criteria(r, criteria))
            .collect())
    }

    async fn update(&self, collection: &str, data: Document) -> Result<Document> {
        let id = data
            .get(ID_FIELD)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| Error::MissingPrimaryKeyValue {
                collection: collection.to_string(),
                field: ID_FIELD.to_string(),
            })?;
        let not_found = || Error::NotFound {
            collection: collection.to_string(),
            key: id.as_str().map_or_else(|| id.to_string(), str::to_string),
        };

        let _guard = self.writes.lock().await;
        let mut records = self
            .load(collection, "update")?
            .filter(|r| !r.is_empty())
            .ok_or_else(not_found)?;
        let position = records
            .iter()
            .position(|r| r.get(ID_FIELD) == Some(&id))
            .ok_or_else(not_found)?;

        let merged = merge(records[position].clone(), data);
        records[position] = merged.clone();
        self.save(collection, "update", &records)?;

        tracing::debug!(collection, id = %id, "Updated record");
        Ok(merged)
    }

    async fn delete(&self, collection: &str, records: &[Document]) -> Result<()> {
        let ids: HashSet<String> = records
            .iter()
            .filter_map(|r| r.get(ID_FIELD))
            .filter(|v| !v.is_null())
            .map(Value::to_string)
            .collect();
        if ids.is_empty() {
            return Ok(());
        }

        let _guard = self.writes.lock().await;
        let Some(mut stored) = self.load(collection, "delete")? else {
            return Ok(());
        };
        let before = stored.len();
        stored.retain(|r| !r.get(ID_FIELD).is_some_and(|id| ids.contains(&id.to_string())));
        if stored.len() != before {
            self.save(collection, "delete", &stored)?;
        }

        tracing::debug!(collection, removed = before - stored.len(), "Deleted records");
        Ok(())
    }
}
