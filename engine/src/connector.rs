//! Connectors bind a registry of collections to one engine.
//!
//! [`Connector`] works with any [`Engine`]. [`StructuredStoreConnector`] and
//! [`FlatStoreConnector`] bundle the matching engine; the structured one
//! migrates the database before a collection becomes reachable.

use crate::collection::Collection;
use crate::config::StorageConfig;
use crate::engine::{Engine, FlatStoreEngine, StructuredStoreEngine};
use crate::event::{Event, EventBus};
use crate::keys::KeyGenerator;
use crate::kv::{FileKeyValueStore, KeyValueStore};
use crate::schema::Schema;
use crate::{error::Result, CollectionName, Criteria, Document, Error};
use dashmap::DashMap;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// Anything that names a collection: a bare name, a schema or a collection.
pub trait CollectionRef: Send + Sync {
    fn collection_name(&self) -> &str;
}

impl CollectionRef for str {
    fn collection_name(&self) -> &str {
        self
    }
}

impl CollectionRef for String {
    fn collection_name(&self) -> &str {
        self
    }
}

impl CollectionRef for Schema {
    fn collection_name(&self) -> &str {
        self.name()
    }
}

impl CollectionRef for Collection {
    fn collection_name(&self) -> &str {
        self.name()
    }
}

/// State shared between a connector and the collections it registered.
pub(crate) struct Binding {
    pub(crate) engine: Arc<dyn Engine>,
    pub(crate) events: EventBus,
    pub(crate) keys: KeyGenerator,
}

/// Binds collections to one engine instance.
///
/// Cloning is cheap and yields a handle to the same engine, listeners and
/// registry.
#[derive(Clone)]
pub struct Connector {
    binding: Arc<Binding>,
    collections: Arc<OnceLock<DashMap<CollectionName, Arc<Collection>>>>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("collections", &self.collection_names())
            .field("events", &self.binding.events)
            .finish()
    }
}

impl Connector {
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self::with_key_generator(engine, KeyGenerator::default())
    }

    /// Connector whose collections generate missing primary keys with `keys`.
    pub fn with_key_generator(engine: Arc<dyn Engine>, keys: KeyGenerator) -> Self {
        Self {
            binding: Arc::new(Binding {
                engine,
                events: EventBus::new(),
                keys,
            }),
            collections: Arc::new(OnceLock::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.binding.engine
    }

    /// Connector-scoped listeners.
    pub fn events(&self) -> &EventBus {
        &self.binding.events
    }

    /// Initialize the engine, emitting `init` on success or `error` on failure.
    pub async fn initialize(&self) -> Result<()> {
        match self.binding.engine.initialize().await {
            Ok(()) => {
                self.binding.events.emit(&Event::Init);
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Engine initialization failed");
                self.binding.events.emit(&Event::Error {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// [`initialize`](Self::initialize), additionally reporting the outcome to
    /// `callback` as `(error, connector)`.
    pub async fn initialize_with<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(Option<&Error>, &Connector) + Send,
    {
        let result = self.initialize().await;
        callback(result.as_ref().err(), self);
        result
    }

    /// Register a collection for `schema`, replacing any previous one of the
    /// same name.
    pub async fn add_collection(&self, schema: Schema) -> Result<Arc<Collection>> {
        Ok(self.register(schema))
    }

    pub(crate) fn register(&self, schema: Schema) -> Arc<Collection> {
        let name = schema.name().to_string();
        let collection = Arc::new(Collection::new(schema, Arc::clone(&self.binding)));
        self.collections
            .get_or_init(DashMap::new)
            .insert(name.clone(), Arc::clone(&collection));
        tracing::info!(collection = %name, "Collection registered");
        collection
    }

    pub fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections
            .get()
            .and_then(|c| c.get(name).map(|entry| Arc::clone(entry.value())))
    }

    /// Registered collection names, sorted.
    pub fn collection_names(&self) -> Vec<CollectionName> {
        let mut names: Vec<CollectionName> = self
            .collections
            .get()
            .map(|c| c.iter().map(|entry| entry.key().clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Write straight to the engine, bypassing validation and events.
    pub async fn create<C>(&self, target: &C, data: Document) -> Result<Document>
    where
        C: CollectionRef + ?Sized,
    {
        self.binding
            .engine
            .create(target.collection_name(), data)
            .await
    }

    pub async fn find<C>(&self, target: &C, criteria: &Criteria) -> Result<Vec<Document>>
    where
        C: CollectionRef + ?Sized,
    {
        self.binding
            .engine
            .find(target.collection_name(), criteria)
            .await
    }

    pub async fn delete<C>(&self, target: &C, records: &[Document]) -> Result<()>
    where
        C: CollectionRef + ?Sized,
    {
        self.binding
            .engine
            .delete(target.collection_name(), records)
            .await
    }
}

/// Connector over a [`StructuredStoreEngine`].
#[derive(Debug, Clone)]
pub struct StructuredStoreConnector {
    engine: Arc<StructuredStoreEngine>,
    connector: Connector,
}

impl StructuredStoreConnector {
    pub fn new(store_name: impl Into<String>, version: u32) -> Self {
        Self::from_engine(StructuredStoreEngine::new(store_name, version))
    }

    pub fn in_directory(dir: impl AsRef<Path>, store_name: impl Into<String>, version: u32) -> Self {
        Self::from_engine(StructuredStoreEngine::in_directory(dir, store_name, version))
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let engine = StructuredStoreEngine::in_directory(
            &config.data_dir,
            config.store_name.clone(),
            config.version,
        )
        .with_key_generator(config.key_strategy);
        Self::build(engine, config.key_strategy)
    }

    pub fn from_engine(engine: StructuredStoreEngine) -> Self {
        Self::build(engine, KeyGenerator::default())
    }

    fn build(engine: StructuredStoreEngine, keys: KeyGenerator) -> Self {
        let engine = Arc::new(engine);
        let connector = Connector::with_key_generator(engine.clone(), keys);
        Self { engine, connector }
    }

    pub fn engine(&self) -> &Arc<StructuredStoreEngine> {
        &self.engine
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Migrate the database for `schema`, then register the collection.
    ///
    /// The collection is never reachable before its table exists; a failed
    /// migration registers nothing.
    pub async fn add_collection(&self, schema: Schema) -> Result<Arc<Collection>> {
        self.engine.add_schema(schema.name(), &schema).await?;
        Ok(self.connector.register(schema))
    }
}

impl Deref for StructuredStoreConnector {
    type Target = Connector;

    fn deref(&self) -> &Connector {
        &self.connector
    }
}

/// Connector over a [`FlatStoreEngine`].
#[derive(Debug, Clone)]
pub struct FlatStoreConnector {
    engine: Arc<FlatStoreEngine>,
    connector: Connector,
}

impl FlatStoreConnector {
    /// Flat connector over an in-memory key-value store.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self::from_engine(FlatStoreEngine::new(namespace), KeyGenerator::default())
    }

    pub fn with_store(namespace: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self::from_engine(
            FlatStoreEngine::with_store(namespace, store),
            KeyGenerator::default(),
        )
    }

    /// Flat connector persisting to `<data_dir>/flat`.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        let dir = config.data_dir.join("flat");
        let store = FileKeyValueStore::open(&dir)
            .map_err(|e| Error::backend(config.namespace.clone(), "open", e))?;
        let engine = FlatStoreEngine::with_store(config.namespace.clone(), Arc::new(store))
            .with_key_generator(config.key_strategy);
        Ok(Self::from_engine(engine, config.key_strategy))
    }

    fn from_engine(engine: FlatStoreEngine, keys: KeyGenerator) -> Self {
        let engine = Arc::new(engine);
        let connector = Connector::with_key_generator(engine.clone(), keys);
        Self { engine, connector }
    }

    pub fn engine(&self) -> &Arc<FlatStoreEngine> {
        &self.engine
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }
}

impl Deref for FlatStoreConnector {
    type Target = Connector;

    fn deref(&self) -> &Connector {
        &self.connector
    }
}
