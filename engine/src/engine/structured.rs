//! SQLite-backed structured store.
//!
//! Each collection is a table holding one JSON document per row. A table with
//! a primary key gets a `key` column (`INTEGER PRIMARY KEY AUTOINCREMENT` when
//! the key auto-increments); every other index is an expression index over
//! `json_extract(data, ...)`. The database version lives in
//! `PRAGMA user_version` and is bumped once per registered collection.

use super::index::{derive_index_spec, IndexDef, IndexSpec};
use super::{is_addressable, matches_criteria, merge, Engine};
use crate::keys::KeyGenerator;
use crate::schema::{FieldType, Schema};
use crate::{error::Result, Criteria, Document, Error};
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Arguments, Row};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Maximum number of keys bound into a single `DELETE ... IN (...)`.
const DELETE_CHUNK: usize = 500;

/// Lifecycle of the database handle.
///
/// `Closed -> Open` on initialize, `Open -> Reopening -> Open` while a schema
/// is registered. Operations are only accepted while `Open`.
#[derive(Debug, Default)]
pub(crate) enum HandleState {
    #[default]
    Closed,
    Reopening { from: u32, to: u32 },
    Open { pool: SqlitePool, version: u32 },
}

impl HandleState {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            HandleState::Closed => "closed",
            HandleState::Reopening { .. } => "reopening",
            HandleState::Open { .. } => "open",
        }
    }

    pub(crate) fn version(&self) -> Option<u32> {
        match self {
            HandleState::Open { version, .. } => Some(*version),
            _ => None,
        }
    }

    pub(crate) fn pool(&self) -> Result<&SqlitePool> {
        match self {
            HandleState::Open { pool, .. } => Ok(pool),
            HandleState::Reopening { from, to } => {
                tracing::debug!(from, to, "Rejecting operation while the schema migrates");
                Err(Error::EngineUnavailable { state: self.name() })
            }
            HandleState::Closed => Err(Error::EngineUnavailable { state: self.name() }),
        }
    }

    /// Move from `Open` to `Reopening`, handing back the pool to close.
    pub(crate) fn begin_reopen(&mut self) -> Result<(SqlitePool, u32)> {
        match std::mem::take(self) {
            HandleState::Open { pool, version } => {
                *self = HandleState::Reopening {
                    from: version,
                    to: version + 1,
                };
                Ok((pool, version))
            }
            other => {
                let state = other.name();
                *self = other;
                Err(Error::EngineUnavailable { state })
            }
        }
    }

    pub(crate) fn open(&mut self, pool: SqlitePool, version: u32) {
        *self = HandleState::Open { pool, version };
    }

    pub(crate) fn close(&mut self) -> Option<SqlitePool> {
        match std::mem::take(self) {
            HandleState::Open { pool, .. } => Some(pool),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct TableDef {
    spec: IndexSpec,
    key_type: FieldType,
}

#[derive(Debug, Default)]
struct Inner {
    handle: HandleState,
    tables: BTreeMap<String, TableDef>,
}

impl Inner {
    fn table(&self, name: &str) -> Result<&TableDef> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }
}

/// Engine storing collections as tables of a versioned SQLite database.
#[derive(Debug)]
pub struct StructuredStoreEngine {
    store_name: String,
    path: PathBuf,
    initial_version: u32,
    keys: KeyGenerator,
    inner: RwLock<Inner>,
}

impl StructuredStoreEngine {
    /// Store `<store_name>.sqlite3` in the working directory.
    pub fn new(store_name: impl Into<String>, version: u32) -> Self {
        Self::in_directory(".", store_name, version)
    }

    /// Store `<dir>/<store_name>.sqlite3`.
    pub fn in_directory(dir: impl AsRef<Path>, store_name: impl Into<String>, version: u32) -> Self {
        let store_name = store_name.into();
        let path = dir.as_ref().join(format!("{}.sqlite3", store_name));
        Self {
            store_name,
            path,
            initial_version: version,
            keys: KeyGenerator::default(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn with_key_generator(mut self, keys: KeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_name(&self) -> &str {
        &self.store_name
    }

    /// Current database version, or `None` when the handle is not open.
    pub async fn version(&self) -> Option<u32> {
        self.inner.read().await.handle.version()
    }

    /// Name of the handle state (`closed`, `reopening`, `open`).
    pub async fn state(&self) -> &'static str {
        self.inner.read().await.handle.name()
    }

    /// Registered table names.
    pub async fn tables(&self) -> Vec<String> {
        self.inner.read().await.tables.keys().cloned().collect()
    }

    pub async fn index_spec(&self, table: &str) -> Option<IndexSpec> {
        self.inner
            .read()
            .await
            .tables
            .get(table)
            .map(|t| t.spec.clone())
    }

    /// Register a table for `schema`, migrating the database to `version + 1`.
    ///
    /// The handle is closed, reopened and laid out for every registered table
    /// inside one transaction. On failure the previous handle is restored and
    /// no registration is recorded.
    pub async fn add_schema(&self, table: &str, schema: &Schema) -> Result<()> {
        let mut spec = derive_index_spec(schema);
        spec.indexes.retain(|index| {
            let addressable = field_expr(&index.field).is_some();
            if !addressable {
                tracing::warn!(
                    table,
                    field = %index.field,
                    unique = index.unique,
                    "Field name cannot be addressed as a JSON path; skipping its index"
                );
            }
            addressable
        });
        if let Some(forced) = spec.indexes.first().filter(|_| spec.forced) {
            tracing::warn!(
                table,
                field = %forced.field,
                "No indexable field declared; forcing a unique index on the first field"
            );
        }
        let def = TableDef {
            spec,
            key_type: schema
                .primary_key()
                .map(|f| f.field_type.clone())
                .unwrap_or(FieldType::String),
        };

        let mut inner = self.inner.write().await;
        let mut tables = inner.tables.clone();
        tables.insert(table.to_string(), def);

        let (old_pool, from) = inner.handle.begin_reopen()?;
        old_pool.close().await;
        let to = from + 1;

        match self.reopen(&tables, to).await {
            Ok(pool) => {
                inner.handle.open(pool, to);
                inner.tables = tables;
                tracing::info!(store = %self.store_name, table, from, to, "Schema migration applied");
                Ok(())
            }
            Err(source) => {
                match open_pool(&self.path).await {
                    Ok(pool) => inner.handle.open(pool, from),
                    Err(e) => {
                        tracing::error!(store = %self.store_name, error = %e, "Failed to restore database handle");
                        inner.handle = HandleState::Closed;
                    }
                }
                Err(Error::backend(table, "migrate", source))
            }
        }
    }

    /// Close the database handle. Registered tables are kept.
    pub async fn close(&self) {
        let pool = self.inner.write().await.handle.close();
        if let Some(pool) = pool {
            pool.close().await;
            tracing::debug!(store = %self.store_name, "Structured store closed");
        }
    }

    async fn reopen(
        &self,
        tables: &BTreeMap<String, TableDef>,
        version: u32,
    ) -> std::result::Result<SqlitePool, sqlx::Error> {
        let pool = open_pool(&self.path).await?;
        if let Err(e) = apply_layout(&pool, tables, version).await {
            pool.close().await;
            return Err(e);
        }
        Ok(pool)
    }

    async fn fetch_by_key(
        pool: &SqlitePool,
        collection: &str,
        table: &TableDef,
        key: SqlValue,
    ) -> Result<Option<Document>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE \"key\" = ?",
            select_columns(&table.spec),
            quote_ident(collection)
        );
        let args = arguments(vec![key]).map_err(|e| Error::backend(collection, "find", e))?;
        let row = sqlx::query_with(&sql, args)
            .fetch_optional(pool)
            .await
            .map_err(|e| Error::backend(collection, "find", e))?;
        row.map(|r| decode_row(collection, &table.spec, &r))
            .transpose()
    }
}

#[async_trait]
impl Engine for StructuredStoreEngine {
    async fn initialize(&self) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let HandleState::Open { .. } = inner.handle {
            return Ok(());
        }

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| Error::backend(&self.store_name, "open", e))?;
        }
        let pool = open_pool(&self.path)
            .await
            .map_err(|e| Error::backend(&self.store_name, "open", e))?;
        let stored = match read_version(&pool).await {
            Ok(v) => v,
            Err(e) => {
                pool.close().await;
                return Err(Error::backend(&self.store_name, "open", e));
            }
        };

        // A restarted application opens at its configured version while the
        // file already carries later migrations; adopt the stored one.
        let version = stored.max(self.initial_version);
        if stored < version {
            if let Err(e) = write_version(&pool, version).await {
                pool.close().await;
                return Err(Error::backend(&self.store_name, "open", e));
            }
        }

        inner.handle.open(pool, version);
        tracing::info!(store = %self.store_name, path = %self.path.display(), version, "Structured store opened");
        Ok(())
    }

    async fn create(&self, collection: &str, mut data: Document) -> Result<Document> {
        let inner = self.inner.read().await;
        let table = inner.table(collection)?;
        let pool = inner.handle.pool()?;
        let name = quote_ident(collection);

        let key = table.spec.primary_key.as_ref();
        let key_missing = key.is_some_and(|k| data.get(&k.field).map_or(true, Value::is_null));

        match key {
            Some(k) if k.auto_increment && key_missing => {
                let json = serde_json::to_string(&data)
                    .map_err(|e| Error::backend(collection, "create", e))?;
                let result = sqlx::query(&format!("INSERT INTO {} (\"data\") VALUES (?)", name))
                    .bind(json)
                    .execute(pool)
                    .await
                    .map_err(|e| Error::backend(collection, "create", e))?;
                let id = result.last_insert_rowid();
                tracing::debug!(collection, key = id, "Inserted record with generated key");

                Self::fetch_by_key(pool, collection, table, SqlValue::Int(id))
                    .await?
                    .ok_or_else(|| Error::NotFound {
                        collection: collection.to_string(),
                        key: id.to_string(),
                    })
            }
            Some(k) => {
                if key_missing {
                    data.insert(k.field.clone(), self.keys.generate(&table.key_type));
                }
                let key_value = key_bind(collection, &data[&k.field], k.auto_increment)?;
                let json = serde_json::to_string(&data)
                    .map_err(|e| Error::backend(collection, "create", e))?;
                let args = arguments(vec![key_value, SqlValue::Text(json)])
                    .map_err(|e| Error::backend(collection, "create", e))?;
                sqlx::query_with(
                    &format!("INSERT INTO {} (\"key\", \"data\") VALUES (?, ?)", name),
                    args,
                )
                .execute(pool)
                .await
                .map_err(|e| Error::backend(collection, "create", e))?;
                tracing::debug!(collection, key = %data[&k.field], "Inserted record");
                Ok(data)
            }
            None => {
                let json = serde_json::to_string(&data)
                    .map_err(|e| Error::backend(collection, "create", e))?;
                sqlx::query(&format!("INSERT INTO {} (\"data\") VALUES (?)", name))
                    .bind(json)
                    .execute(pool)
                    .await
                    .map_err(|e| Error::backend(collection, "create", e))?;
                tracing::debug!(collection, "Inserted keyless record");
                Ok(data)
            }
        }
    }

    async fn find(&self, collection: &str, criteria: &Criteria) -> Result<Vec<Document>> {
        let inner = self.inner.read().await;
        let table = inner.table(collection)?;
        let pool = inner.handle.pool()?;

        let (clause, binds) = where_clause(&table.spec, criteria);
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY rowid",
            select_columns(&table.spec),
            quote_ident(collection),
            clause
        );
        let args = arguments(binds).map_err(|e| Error::backend(collection, "find", e))?;

        let mut rows = sqlx::query_with(&sql, args).fetch(pool);
        let mut found = Vec::new();
        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|e| Error::backend(collection, "find", e))?
        {
            let document = decode_row(collection, &table.spec, &row)?;
            if matches_criteria(&document, criteria) {
                found.push(document);
            }
        }
        Ok(found)
    }

    async fn update(&self, collection: &str, data: Document) -> Result<Document> {
        let inner = self.inner.read().await;
        let table = inner.table(collection)?;
        let pool = inner.handle.pool()?;

        let key = table
            .spec
            .primary_key
            .as_ref()
            .ok_or_else(|| Error::PrimaryKeyRequired {
                collection: collection.to_string(),
            })?;
        let key_value = data
            .get(&key.field)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| Error::MissingPrimaryKeyValue {
                collection: collection.to_string(),
                field: key.field.clone(),
            })?;
        let bind = key_bind(collection, &key_value, key.auto_increment)?;

        let existing = Self::fetch_by_key(pool, collection, table, bind.clone())
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: collection.to_string(),
                key: display_key(&key_value),
            })?;
        let merged = merge(existing, data);

        let json =
            serde_json::to_string(&merged).map_err(|e| Error::backend(collection, "update", e))?;
        let args = arguments(vec![SqlValue::Text(json), bind])
            .map_err(|e| Error::backend(collection, "update", e))?;
        sqlx::query_with(
            &format!(
                "UPDATE {} SET \"data\" = ? WHERE \"key\" = ?",
                quote_ident(collection)
            ),
            args,
        )
        .execute(pool)
        .await
        .map_err(|e| Error::backend(collection, "update", e))?;

        tracing::debug!(collection, key = %key_value, "Updated record");
        Ok(merged)
    }

    async fn delete(&self, collection: &str, records: &[Document]) -> Result<()> {
        let inner = self.inner.read().await;
        let table = inner.table(collection)?;
        let pool = inner.handle.pool()?;

        let key = table
            .spec
            .primary_key
            .as_ref()
            .ok_or_else(|| Error::PrimaryKeyRequired {
                collection: collection.to_string(),
            })?;

        let ids = records
            .iter()
            .filter_map(|r| r.get(&key.field))
            .filter(|v| is_addressable(v))
            .map(|v| key_bind(collection, v, key.auto_increment))
            .collect::<Result<Vec<_>>>()?;
        if ids.is_empty() {
            return Ok(());
        }

        let name = quote_ident(collection);
        let mut tx = pool
            .begin()
            .await
            .map_err(|e| Error::backend(collection, "delete", e))?;
        for chunk in ids.chunks(DELETE_CHUNK) {
            let sql = format!(
                "DELETE FROM {} WHERE \"key\" IN ({})",
                name,
                vec!["?"; chunk.len()].join(", ")
            );
            let args =
                arguments(chunk.to_vec()).map_err(|e| Error::backend(collection, "delete", e))?;
            sqlx::query_with(&sql, args)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::backend(collection, "delete", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| Error::backend(collection, "delete", e))?;

        tracing::debug!(collection, count = ids.len(), "Deleted records");
        Ok(())
    }
}

/// A value bound into a statement.
#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Text(String),
    Int(i64),
    Real(f64),
}

fn arguments<'q>(values: Vec<SqlValue>) -> std::result::Result<SqliteArguments<'q>, sqlx::Error> {
    let mut args = SqliteArguments::default();
    for value in values {
        let added = match value {
            SqlValue::Text(s) => args.add(s),
            SqlValue::Int(i) => args.add(i),
            SqlValue::Real(f) => args.add(f),
        };
        added.map_err(sqlx::Error::Encode)?;
    }
    Ok(args)
}

/// Scalar JSON values as SQLite sees them through `json_extract`.
fn scalar_bind(value: &Value) -> Option<SqlValue> {
    match value {
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Bool(b) => Some(SqlValue::Int(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Int(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn key_bind(collection: &str, value: &Value, auto_increment: bool) -> Result<SqlValue> {
    let invalid = |reason: String| Error::InvalidKey {
        collection: collection.to_string(),
        reason,
    };
    if auto_increment {
        return value
            .as_i64()
            .map(SqlValue::Int)
            .ok_or_else(|| invalid(format!("auto-increment key must be an integer, got {}", value)));
    }
    match value {
        Value::String(_) | Value::Number(_) => {
            scalar_bind(value).ok_or_else(|| invalid(format!("unsupported key {}", value)))
        }
        other => Err(invalid(format!("keys must be strings or numbers, got {}", other))),
    }
}

fn display_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Expression addressing one document field; shared by index DDL and queries
/// so lookups can use the indexes.
///
/// SQLite path labels have no escape for `"`, so such names yield `None` and
/// are left to the in-memory filter.
fn field_expr(field: &str) -> Option<String> {
    if field.contains('"') {
        return None;
    }
    let path = format!("$.\"{}\"", field);
    Some(format!(
        "json_extract(\"data\", '{}')",
        path.replace('\'', "''")
    ))
}

fn select_columns(spec: &IndexSpec) -> &'static str {
    match &spec.primary_key {
        Some(k) if k.auto_increment => "\"key\", \"data\"",
        _ => "\"data\"",
    }
}

fn where_clause(spec: &IndexSpec, criteria: &Criteria) -> (String, Vec<SqlValue>) {
    let mut terms = Vec::new();
    let mut binds = Vec::new();
    for (field, value) in criteria {
        let column = match &spec.primary_key {
            Some(k) if k.field == *field => "\"key\"".to_string(),
            _ => match field_expr(field) {
                Some(expr) => expr,
                None => continue,
            },
        };
        if value.is_null() {
            terms.push(format!("{} IS NULL", column));
        } else if let Some(bind) = scalar_bind(value) {
            terms.push(format!("{} = ?", column));
            binds.push(bind);
        }
        // arrays and objects are matched by the in-memory filter only
    }

    if terms.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" WHERE {}", terms.join(" AND ")), binds)
    }
}

fn decode_row(collection: &str, spec: &IndexSpec, row: &SqliteRow) -> Result<Document> {
    let raw: String = row
        .try_get("data")
        .map_err(|e| Error::backend(collection, "decode", e))?;
    let mut document: Document =
        serde_json::from_str(&raw).map_err(|e| Error::backend(collection, "decode", e))?;

    if let Some(key) = spec.primary_key.as_ref().filter(|k| k.auto_increment) {
        let id: i64 = row
            .try_get("key")
            .map_err(|e| Error::backend(collection, "decode", e))?;
        document.insert(key.field.clone(), Value::from(id));
    }
    Ok(document)
}

fn create_table_sql(table: &str, spec: &IndexSpec) -> String {
    let columns = match &spec.primary_key {
        Some(k) if k.auto_increment => {
            "\"key\" INTEGER PRIMARY KEY AUTOINCREMENT, \"data\" TEXT NOT NULL"
        }
        Some(_) => "\"key\" NOT NULL PRIMARY KEY, \"data\" TEXT NOT NULL",
        None => "\"data\" TEXT NOT NULL",
    };
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), columns)
}

/// Index DDL, or `None` when the field cannot be addressed.
///
/// Names carry the table name's length so `a` + `b__c` and `a__b` + `c`
/// stay distinct.
fn create_index_sql(table: &str, index: &IndexDef) -> Option<String> {
    let expr = field_expr(&index.field)?;
    Some(format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        quote_ident(&index_name(table, &index.field)),
        quote_ident(table),
        expr
    ))
}

fn index_name(table: &str, field: &str) -> String {
    format!("{}_{}__{}", table.chars().count(), table, field)
}

async fn open_pool(path: &Path) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
}

async fn read_version(pool: &SqlitePool) -> std::result::Result<u32, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(u32::try_from(version).unwrap_or(0))
}

async fn write_version(pool: &SqlitePool, version: u32) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(&format!("PRAGMA user_version = {}", version))
        .execute(pool)
        .await?;
    Ok(())
}

/// Lay out every table and its indexes, then record the version.
async fn apply_layout(
    pool: &SqlitePool,
    tables: &BTreeMap<String, TableDef>,
    version: u32,
) -> std::result::Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for (name, def) in tables {
        sqlx::query(&create_table_sql(name, &def.spec))
            .execute(&mut *tx)
            .await?;
        for ddl in def.spec.indexes.iter().filter_map(|i| create_index_sql(name, i)) {
            sqlx::query(&ddl).execute(&mut *tx).await?;
        }
    }
    sqlx::query(&format!("PRAGMA user_version = {}", version))
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}
