//! # Stowage Engine
//!
//! Schema-validated persistence for embedded, offline-first applications.
//!
//! Application code talks to [`Collection`]s. Each collection validates
//! records against its [`Schema`], enforces unique fields and primary key
//! addressing, emits lifecycle events, and hands the record to whichever
//! [`Engine`] its [`Connector`] is bound to.
//!
//! ## Backends
//!
//! - [`StructuredStoreEngine`] - SQLite database with one table per
//!   collection and indexes derived from the schema. Registering a collection
//!   migrates the database and bumps its version.
//! - [`FlatStoreEngine`] - one JSON array per collection in a key-value store,
//!   either in memory or one file per key.
//!
//! ## Events
//!
//! Writes emit `beforeCreate`/`create`, `beforeUpdate`/`update` and
//! `beforeDelete`/`delete` on both the collection's and the connector's
//! [`EventBus`]. Reads emit `find` on the connector; initialization emits
//! `init` or `error`.
//!
//! ## Quick Start
//!
//! ```rust
//! use stowage_engine::{FieldDef, FieldType, FlatStoreConnector, Schema};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! // 1. Define a schema
//! let schema = Schema::new(
//!     "users",
//!     vec![
//!         FieldDef::primary_key("id", FieldType::Number),
//!         FieldDef::required("name", FieldType::String),
//!         FieldDef::optional("email", FieldType::String).unique(),
//!     ],
//! )
//! .unwrap();
//!
//! // 2. Bind it to a backend
//! let connector = FlatStoreConnector::new("app");
//! connector.initialize().await.unwrap();
//! let users = connector.add_collection(schema).await.unwrap();
//!
//! // 3. Write and query
//! let alice = users
//!     .create(json!({"name": "Alice", "email": "alice@example.com"}))
//!     .await
//!     .unwrap();
//! assert!(alice["id"].is_u64());
//!
//! let duplicate = users
//!     .create(json!({"name": "Bob", "email": "alice@example.com"}))
//!     .await;
//! assert!(duplicate.is_err());
//! # }
//! ```

pub mod collection;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod event;
pub mod keys;
pub mod kv;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use collection::Collection;
pub use config::{ConfigError, StorageConfig};
pub use connector::{CollectionRef, Connector, FlatStoreConnector, StructuredStoreConnector};
pub use engine::{
    derive_index_spec, Engine, FlatStoreEngine, IndexDef, IndexSpec, KeyPath,
    StructuredStoreEngine,
};
pub use error::{BackendError, Error, Result};
pub use event::{Event, EventBus, EventKind, ListenerId};
pub use keys::KeyGenerator;
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use schema::{FieldDef, FieldError, FieldType, Schema, ValidationReport};
pub use store::Store;

/// Type aliases for clarity
pub type CollectionName = String;
pub type Document = serde_json::Map<String, serde_json::Value>;
pub type Criteria = Document;
