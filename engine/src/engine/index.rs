//! Index derivation for the structured backend.

use crate::schema::Schema;
use serde::Serialize;

/// How records of a table are addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPath {
    pub field: String,
    pub auto_increment: bool,
}

/// A secondary index on one document field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDef {
    pub field: String,
    pub unique: bool,
}

/// Physical layout derived from a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub primary_key: Option<KeyPath>,
    pub indexes: Vec<IndexDef>,
    /// Set when no field qualified and the first declared field was forced
    /// into a unique index.
    pub forced: bool,
}

impl IndexSpec {
    pub fn index(&self, field: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.field == field)
    }
}

/// Derive the index layout for a schema.
///
/// - the primary key addresses the table (auto-incrementing if requested)
/// - required, explicitly indexed and unique fields get secondary indexes,
///   unique ones as unique indexes
/// - a table needs at least one index, so when nothing qualifies the first
///   declared field becomes a unique index
pub fn derive_index_spec(schema: &Schema) -> IndexSpec {
    let primary_key = schema.primary_key().map(|f| KeyPath {
        field: f.name.clone(),
        auto_increment: f.auto_increment,
    });

    let mut indexes: Vec<IndexDef> = Vec::new();
    for field in schema.fields() {
        if field.primary_key {
            continue;
        }
        if field.required || field.index || field.unique {
            indexes.push(IndexDef {
                field: field.name.clone(),
                unique: field.unique,
            });
        }
    }

    let mut forced = false;
    if primary_key.is_none() && indexes.is_empty() {
        if let Some(first) = schema.fields().first() {
            indexes.push(IndexDef {
                field: first.name.clone(),
                unique: true,
            });
            forced = true;
        }
    }

    IndexSpec {
        primary_key,
        indexes,
        forced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType};

    #[test]
    fn derives_from_flags() {
        let schema = Schema::new(
            "users",
            vec![
                FieldDef::primary_key("id", FieldType::Number).auto_increment(),
                FieldDef::required("name", FieldType::String),
                FieldDef::optional("email", FieldType::String).unique(),
                FieldDef::optional("city", FieldType::String).indexed(),
                FieldDef::optional("bio", FieldType::String),
            ],
        )
        .unwrap();

        let spec = derive_index_spec(&schema);
        assert_eq!(
            spec.primary_key,
            Some(KeyPath {
                field: "id".into(),
                auto_increment: true
            })
        );
        assert_eq!(
            spec.indexes,
            vec![
                IndexDef { field: "name".into(), unique: false },
                IndexDef { field: "email".into(), unique: true },
                IndexDef { field: "city".into(), unique: false },
            ]
        );
        assert!(spec.index("bio").is_none());
        assert!(!spec.forced);
    }

    #[test]
    fn required_and_unique_field_is_one_unique_index() {
        let schema = Schema::new(
            "accounts",
            vec![FieldDef::required("login", FieldType::String).unique()],
        )
        .unwrap();

        let spec = derive_index_spec(&schema);
        assert_eq!(
            spec.indexes,
            vec![IndexDef { field: "login".into(), unique: true }]
        );
    }

    #[test]
    fn primary_key_alone_qualifies() {
        let schema = Schema::new(
            "tags",
            vec![
                FieldDef::primary_key("slug", FieldType::String),
                FieldDef::optional("label", FieldType::String),
            ],
        )
        .unwrap();

        let spec = derive_index_spec(&schema);
        assert!(!spec.forced);
        assert!(spec.indexes.is_empty());
        assert_eq!(spec.primary_key.map(|k| k.auto_increment), Some(false));
    }

    #[test]
    fn first_field_forced_when_nothing_qualifies() {
        let schema = Schema::new(
            "notes",
            vec![
                FieldDef::optional("title", FieldType::String),
                FieldDef::optional("body", FieldType::String),
            ],
        )
        .unwrap();

        let spec = derive_index_spec(&schema);
        assert!(spec.forced);
        assert_eq!(
            spec.indexes,
            vec![IndexDef { field: "title".into(), unique: true }]
        );
    }
}
