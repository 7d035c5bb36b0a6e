//! Validated, event-emitting CRUD over one schema.
//!
//! A [`Collection`] is where record invariants are checked before anything
//! reaches an engine: strict validation on create, uniqueness on create and
//! on changed unique fields during update, and primary key addressing for
//! updates.
//!
//! Uniqueness is a read-then-write sequence. Two concurrent writers can both
//! pass the check before either record lands.

use crate::connector::Binding;
use crate::engine::merge;
use crate::event::{Event, EventBus};
use crate::schema::{FieldError, Schema};
use crate::{error::Result, Criteria, Document, Error};
use serde_json::Value;
use std::sync::Arc;

/// A schema bound to the connector that registered it.
pub struct Collection {
    schema: Arc<Schema>,
    binding: Arc<Binding>,
    events: EventBus,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.schema.name())
            .field("events", &self.events)
            .finish()
    }
}

impl Collection {
    pub(crate) fn new(schema: Schema, binding: Arc<Binding>) -> Self {
        Self {
            schema: Arc::new(schema),
            binding,
            events: EventBus::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Collection-scoped listeners. Write events fire here and on the
    /// connector; `find` fires on the connector only.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Validate and persist a new record.
    ///
    /// A missing primary key is generated unless the key auto-increments, in
    /// which case the engine assigns it. Nothing is written when validation or
    /// a uniqueness check fails.
    pub async fn create(&self, data: Value) -> Result<Document> {
        let mut candidate = data;
        if let (Some(pk), Value::Object(record)) = (self.schema.primary_key(), &mut candidate) {
            if !pk.auto_increment && record.get(&pk.name).map_or(true, Value::is_null) {
                let key = self.binding.keys.generate(&pk.field_type);
                record.insert(pk.name.clone(), key);
            }
        }

        self.schema.validate_strict(&candidate)?;
        let Value::Object(record) = candidate else {
            return Err(Error::Validation {
                collection: self.name().to_string(),
                errors: vec![FieldError::record("Record must be an object")],
            });
        };

        for field in self.schema.unique_fields() {
            let Some(value) = record.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if !self.find(criterion(&field.name, value)).await?.is_empty() {
                return Err(self.conflict(&field.name, value));
            }
        }

        self.emit_both(Event::BeforeCreate {
            collection: self.name().to_string(),
            data: record.clone(),
        });
        let created = self.binding.engine.create(self.name(), record).await?;
        self.emit_both(Event::Create {
            collection: self.name().to_string(),
            record: created.clone(),
        });

        tracing::debug!(collection = %self.name(), "Record created");
        Ok(created)
    }

    /// Records whose fields equal every criterion; empty criteria match all.
    pub async fn find(&self, criteria: Criteria) -> Result<Vec<Document>> {
        self.binding.events.emit(&Event::Find {
            collection: self.name().to_string(),
            criteria: criteria.clone(),
        });
        self.binding.engine.find(self.name(), &criteria).await
    }

    /// Shallow-merge `data` over the record addressed by its primary key.
    ///
    /// The merged record is validated but violations are only logged; the
    /// write proceeds. Unique fields are checked only when their value changes.
    pub async fn update(&self, data: Document) -> Result<Document> {
        let pk = self
            .schema
            .primary_key()
            .ok_or_else(|| Error::PrimaryKeyRequired {
                collection: self.name().to_string(),
            })?;
        let key = data
            .get(&pk.name)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| Error::MissingPrimaryKeyValue {
                collection: self.name().to_string(),
                field: pk.name.clone(),
            })?;

        let current = self
            .find(criterion(&pk.name, &key))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound {
                collection: self.name().to_string(),
                key: key.as_str().map_or_else(|| key.to_string(), str::to_string),
            })?;

        let merged = Value::Object(merge(current.clone(), data.clone()));
        let report = self.schema.validate(&merged);
        if !report.is_valid {
            // Unenforced pending a decision on update validation.
            tracing::warn!(
                collection = %self.name(),
                key = %key,
                errors = ?report.errors,
                "Updating record that fails validation"
            );
        }

        for field in self.schema.unique_fields() {
            let Some(value) = data.get(&field.name).filter(|v| !v.is_null()) else {
                continue;
            };
            if current.get(&field.name) == Some(value) {
                continue;
            }
            let others = self.find(criterion(&field.name, value)).await?;
            if others.iter().any(|r| r.get(&pk.name) != Some(&key)) {
                return Err(self.conflict(&field.name, value));
            }
        }

        self.emit_both(Event::BeforeUpdate {
            collection: self.name().to_string(),
            old: current,
            new: data.clone(),
        });
        let updated = self.binding.engine.update(self.name(), data).await?;
        self.emit_both(Event::Update {
            collection: self.name().to_string(),
            record: updated.clone(),
        });

        tracing::debug!(collection = %self.name(), key = %key, "Record updated");
        Ok(updated)
    }

    /// Delete every record matching `criteria`.
    ///
    /// Returns `true` whether or not anything matched; without matches the
    /// engine is not touched and no write events fire.
    pub async fn delete(&self, criteria: Criteria) -> Result<bool> {
        let records = self.find(criteria).await?;
        if records.is_empty() {
            return Ok(true);
        }

        self.emit_both(Event::BeforeDelete {
            collection: self.name().to_string(),
            records: records.clone(),
        });
        self.binding.engine.delete(self.name(), &records).await?;

        tracing::debug!(collection = %self.name(), count = records.len(), "Records deleted");
        self.emit_both(Event::Delete {
            collection: self.name().to_string(),
            records,
        });
        Ok(true)
    }

    fn emit_both(&self, event: Event) {
        self.events.emit(&event);
        self.binding.events.emit(&event);
    }

    fn conflict(&self, field: &str, value: &Value) -> Error {
        tracing::info!(collection = %self.name(), field, value = %value, "Unique constraint rejected write");
        Error::UniqueConstraint {
            collection: self.name().to_string(),
            field: field.to_string(),
            value: value.clone(),
        }
    }
}

fn criterion(field: &str, value: &Value) -> Criteria {
    let mut criteria = Criteria::new();
    criteria.insert(field.to_string(), value.clone());
    criteria
}
