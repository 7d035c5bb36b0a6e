//! Edge case tests for stowage-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::{json, Value};
use stowage_engine::{
    BackendError, Criteria, Document, Error, FieldDef, FieldType, FlatStoreConnector, Schema,
    StructuredStoreConnector,
};
use tempfile::TempDir;

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn items_schema() -> Schema {
    Schema::new(
        "items",
        vec![
            FieldDef::primary_key("id", FieldType::String),
            FieldDef::required("name", FieldType::String),
            FieldDef::optional("score", FieldType::Number).indexed(),
            FieldDef::optional("active", FieldType::Boolean).indexed(),
            FieldDef::optional("email", FieldType::String).unique(),
        ],
    )
    .unwrap()
}

async fn structured() -> (StructuredStoreConnector, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let connector = StructuredStoreConnector::in_directory(dir.path(), "edge", 1);
    connector.initialize().await.unwrap();
    (connector, dir)
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[tokio::test]
async fn unicode_values_roundtrip() {
    let (connector, _dir) = structured().await;
    let structured_items = connector.add_collection(items_schema()).await.unwrap();
    let flat = FlatStoreConnector::new("edge");
    let flat_items = flat.add_collection(items_schema()).await.unwrap();

    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
        "quote ' and \" both",
    ];

    for items in [&structured_items, &flat_items] {
        for (i, name) in names.iter().enumerate() {
            items
                .create(json!({"id": format!("item-{}", i), "name": name}))
                .await
                .unwrap();
        }
        for name in names {
            let found = items.find(doc(json!({"name": name}))).await.unwrap();
            assert_eq!(found.len(), 1, "{}", name);
            assert_eq!(found[0]["name"], name);
        }
    }
}

#[tokio::test]
async fn special_characters_in_field_and_collection_names() {
    let (connector, _dir) = structured().await;
    let schema = Schema::new(
        "odd \"table\" name",
        vec![
            FieldDef::primary_key("key with spaces", FieldType::String),
            FieldDef::required("it's quoted", FieldType::String).indexed(),
            FieldDef::optional("dotted.path", FieldType::String).unique(),
        ],
    )
    .unwrap();
    let odd = connector.add_collection(schema).await.unwrap();

    let created = odd
        .create(json!({"it's quoted": "v", "dotted.path": "d"}))
        .await
        .unwrap();
    assert!(created["key with spaces"].is_string());

    let found = odd.find(doc(json!({"it's quoted": "v"}))).await.unwrap();
    assert_eq!(found, vec![created.clone()]);
    let found = odd.find(doc(json!({"dotted.path": "d"}))).await.unwrap();
    assert_eq!(found, vec![created]);

    let err = odd
        .create(json!({"it's quoted": "w", "dotted.path": "d"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UniqueConstraint { .. }));
}

#[tokio::test]
async fn double_quotes_in_field_names_still_match_and_stay_unique() {
    let schema = || {
        Schema::new(
            "contacts",
            vec![
                FieldDef::primary_key("id", FieldType::String),
                FieldDef::optional("e\"mail", FieldType::String).unique(),
                FieldDef::optional("say \"hi\"", FieldType::String),
            ],
        )
        .unwrap()
    };

    let (connector, _dir) = structured().await;
    let structured_contacts = connector.add_collection(schema()).await.unwrap();
    let spec = connector.engine().index_spec("contacts").await.unwrap();
    assert!(spec.index("e\"mail").is_none());

    let flat = FlatStoreConnector::new("edge");
    let flat_contacts = flat.add_collection(schema()).await.unwrap();

    for contacts in [&structured_contacts, &flat_contacts] {
        contacts
            .create(json!({"id": "c1", "e\"mail": "a@example.com", "say \"hi\"": "x"}))
            .await
            .unwrap();
        contacts
            .create(json!({"id": "c2", "e\"mail": "b@example.com", "say \"hi\"": "y"}))
            .await
            .unwrap();

        let err = contacts
            .create(json!({"id": "c3", "e\"mail": "a@example.com"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UniqueConstraint { ref field, .. } if field == "e\"mail"));
        assert_eq!(contacts.find(Criteria::new()).await.unwrap().len(), 2);

        let found = contacts.find(doc(json!({"say \"hi\"": "x"}))).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "c1");
    }
}

#[tokio::test]
async fn empty_string_is_a_value_not_an_absence() {
    let flat = FlatStoreConnector::new("edge");
    let items = flat.add_collection(items_schema()).await.unwrap();

    items
        .create(json!({"id": "a", "name": "", "email": ""}))
        .await
        .unwrap();
    let err = items
        .create(json!({"id": "b", "name": "B", "email": ""}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UniqueConstraint { ref value, .. } if value == ""));
}

// ============================================================================
// Criteria Edge Cases
// ============================================================================

#[tokio::test]
async fn null_criteria_match_explicit_nulls_only() {
    let (connector, _dir) = structured().await;
    let structured_items = connector.add_collection(items_schema()).await.unwrap();
    let flat = FlatStoreConnector::new("edge");
    let flat_items = flat.add_collection(items_schema()).await.unwrap();

    for items in [&structured_items, &flat_items] {
        items
            .create(json!({"id": "a", "name": "A", "score": null}))
            .await
            .unwrap();
        items.create(json!({"id": "b", "name": "B"})).await.unwrap();

        let found = items.find(doc(json!({"score": null}))).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["id"], "a");
    }
}

#[tokio::test]
async fn scalar_criteria_compare_exactly() {
    let (connector, _dir) = structured().await;
    let structured_items = connector.add_collection(items_schema()).await.unwrap();
    let flat = FlatStoreConnector::new("edge");
    let flat_items = flat.add_collection(items_schema()).await.unwrap();

    for items in [&structured_items, &flat_items] {
        items
            .create(json!({"id": "a", "name": "A", "score": 2.5, "active": true}))
            .await
            .unwrap();
        items
            .create(json!({"id": "b", "name": "B", "score": 2, "active": false}))
            .await
            .unwrap();

        let ids = |found: Vec<Document>| -> Vec<Value> {
            found.into_iter().map(|d| d["id"].clone()).collect()
        };
        assert_eq!(
            ids(items.find(doc(json!({"active": true}))).await.unwrap()),
            vec![json!("a")]
        );
        assert_eq!(
            ids(items.find(doc(json!({"score": 2.5}))).await.unwrap()),
            vec![json!("a")]
        );
        assert_eq!(
            ids(items.find(doc(json!({"score": 2}))).await.unwrap()),
            vec![json!("b")]
        );
        // strings never equal numbers
        assert!(items.find(doc(json!({"score": "2"}))).await.unwrap().is_empty());
    }
}

// ============================================================================
// Key Edge Cases
// ============================================================================

#[tokio::test]
async fn string_and_numeric_keys_are_distinct() {
    let (connector, _dir) = structured().await;
    let schema = Schema::new(
        "counters",
        vec![
            FieldDef::primary_key("id", FieldType::Number),
            FieldDef::required("label", FieldType::String),
        ],
    )
    .unwrap();
    let counters = connector.add_collection(schema).await.unwrap();
    counters.create(json!({"id": 1, "label": "one"})).await.unwrap();

    assert_eq!(counters.find(doc(json!({"id": 1}))).await.unwrap().len(), 1);
    assert!(counters.find(doc(json!({"id": "1"}))).await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_key_types_are_rejected_by_the_engine() {
    let (connector, _dir) = structured().await;
    connector.add_collection(items_schema()).await.unwrap();

    // passthrough writes skip validation, so the engine sees the bad key
    let err = connector
        .create("items", doc(json!({"id": true, "name": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidKey { ref collection, .. } if collection == "items"));
}

#[tokio::test]
async fn duplicate_primary_key_surfaces_as_backend_error() {
    let (connector, _dir) = structured().await;
    let items = connector.add_collection(items_schema()).await.unwrap();
    items.create(json!({"id": "a", "name": "A"})).await.unwrap();

    let err = items
        .create(json!({"id": "a", "name": "again"}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Backend { operation: "create", source: BackendError::Sqlite(_), .. }
    ));
    assert_eq!(items.find(Criteria::new()).await.unwrap().len(), 1);
}

// ============================================================================
// Schema Layout Edge Cases
// ============================================================================

#[tokio::test]
async fn keyless_schema_gets_a_forced_unique_index() {
    let (connector, _dir) = structured().await;
    let schema = Schema::new(
        "events",
        vec![
            FieldDef::optional("message", FieldType::String),
            FieldDef::optional("level", FieldType::String),
        ],
    )
    .unwrap();
    let events = connector.add_collection(schema).await.unwrap();

    let spec = connector.engine().index_spec("events").await.unwrap();
    assert!(spec.forced);
    assert!(spec.primary_key.is_none());
    assert!(spec.index("message").is_some_and(|i| i.unique));

    events.create(json!({"message": "boot", "level": "info"})).await.unwrap();
    let err = events
        .create(json!({"message": "boot", "level": "warn"}))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Backend { .. }));

    // without a key the records cannot be addressed
    assert!(matches!(
        events.delete(Criteria::new()).await,
        Err(Error::PrimaryKeyRequired { .. })
    ));
}

#[tokio::test]
async fn registration_order_does_not_matter() {
    let (connector, _dir) = structured().await;
    for name in ["c", "a", "b"] {
        let schema = Schema::new(
            name,
            vec![
                FieldDef::primary_key("id", FieldType::String),
                FieldDef::required("n", FieldType::Number),
            ],
        )
        .unwrap();
        let collection = connector.add_collection(schema).await.unwrap();
        collection.create(json!({"n": 1})).await.unwrap();
    }

    assert_eq!(connector.engine().version().await, Some(4));
    assert_eq!(connector.engine().tables().await, vec!["a", "b", "c"]);
    for name in ["a", "b", "c"] {
        let collection = connector.collection(name).unwrap();
        assert_eq!(collection.find(Criteria::new()).await.unwrap().len(), 1);
    }
}

// ============================================================================
// Volume Edge Cases
// ============================================================================

#[tokio::test]
async fn bulk_delete_spans_statement_chunks() {
    let (connector, _dir) = structured().await;
    let items = connector.add_collection(items_schema()).await.unwrap();
    for i in 0..1200 {
        connector
            .create(
                "items",
                doc(json!({"id": format!("i{:04}", i), "name": "bulk", "score": i % 2})),
            )
            .await
            .unwrap();
    }

    assert!(items.delete(doc(json!({"name": "bulk", "score": 0}))).await.unwrap());
    let left = items.find(Criteria::new()).await.unwrap();
    assert_eq!(left.len(), 600);
    assert!(left.iter().all(|d| d["score"] == 1));

    assert!(items.delete(Criteria::new()).await.unwrap());
    assert!(items.find(Criteria::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn structured_operations_require_an_open_handle() {
    let dir = tempfile::tempdir().unwrap();
    let connector = StructuredStoreConnector::in_directory(dir.path(), "edge", 1);

    let err = connector.find("items", &Criteria::new()).await.unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound(_)));

    connector.initialize().await.unwrap();
    let items = connector.add_collection(items_schema()).await.unwrap();
    connector.engine().close().await;

    let err = items.find(Criteria::new()).await.unwrap_err();
    assert!(matches!(err, Error::EngineUnavailable { state: "closed" }));

    connector.initialize().await.unwrap();
    assert!(items.find(Criteria::new()).await.unwrap().is_empty());
}
