//! Command execution against a storage profile.

use crate::error::{CliError, Result};
use clap::{Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use stowage_engine::{
    Collection, Connector, Criteria, FlatStoreConnector, Schema, StorageConfig,
    StructuredStoreConnector,
};

/// Storage backend selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// SQLite database with schema-derived indexes
    Structured,
    /// One JSON file per collection
    Flat,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate and insert a record
    Create {
        collection: String,
        /// Record as a JSON object
        data: String,
    },
    /// List records matching exact-equality criteria
    Find {
        collection: String,
        /// Criteria as a JSON object; omitted matches everything
        criteria: Option<String>,
    },
    /// Merge fields into the record addressed by its primary key
    Update {
        collection: String,
        /// Partial record as a JSON object, including the primary key
        data: String,
    },
    /// Delete records matching exact-equality criteria
    Delete {
        collection: String,
        criteria: Option<String>,
    },
    /// List collections defined in the schema file
    Collections,
}

/// Read a JSON array of `{ "name": ..., "fields": { ... } }` definitions.
pub fn load_schemas(path: &Path) -> Result<Vec<Schema>> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let definitions: Value = serde_json::from_str(&raw)?;
    let Value::Array(definitions) = definitions else {
        return Err(CliError::InvalidInput(format!(
            "{} must contain a JSON array of schemas",
            path.display()
        )));
    };
    definitions
        .iter()
        .map(|d| Schema::from_json(d).map_err(CliError::from))
        .collect()
}

/// An initialized connector with every schema registered.
#[derive(Debug)]
pub enum Profile {
    Structured(StructuredStoreConnector),
    Flat(FlatStoreConnector),
}

impl Profile {
    pub async fn open(
        backend: BackendKind,
        config: &StorageConfig,
        schemas: Vec<Schema>,
    ) -> Result<Self> {
        let profile = match backend {
            BackendKind::Structured => Profile::Structured(StructuredStoreConnector::from_config(config)),
            BackendKind::Flat => Profile::Flat(FlatStoreConnector::from_config(config)?),
        };
        profile.connector().initialize().await?;

        for schema in schemas {
            match &profile {
                Profile::Structured(c) => c.add_collection(schema).await?,
                Profile::Flat(c) => c.add_collection(schema).await?,
            };
        }
        tracing::debug!(
            backend = ?backend,
            collections = profile.connector().collection_names().len(),
            "Profile ready"
        );
        Ok(profile)
    }

    pub fn connector(&self) -> &Connector {
        match self {
            Profile::Structured(c) => c.connector(),
            Profile::Flat(c) => c.connector(),
        }
    }

    fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.connector()
            .collection(name)
            .ok_or_else(|| CliError::UnknownCollection(name.to_string()))
    }
}

/// Execute `command`, returning the JSON to print.
pub async fn run(profile: &Profile, command: Command) -> Result<Value> {
    match command {
        Command::Create { collection, data } => {
            let record = serde_json::from_str(&data)?;
            let created = profile.collection(&collection)?.create(record).await?;
            Ok(Value::Object(created))
        }
        Command::Find {
            collection,
            criteria,
        } => {
            let criteria = parse_object(criteria.as_deref())?;
            let found = profile.collection(&collection)?.find(criteria).await?;
            Ok(Value::Array(found.into_iter().map(Value::Object).collect()))
        }
        Command::Update { collection, data } => {
            let patch = parse_object(Some(&data))?;
            let updated = profile.collection(&collection)?.update(patch).await?;
            Ok(Value::Object(updated))
        }
        Command::Delete {
            collection,
            criteria,
        } => {
            let criteria = parse_object(criteria.as_deref())?;
            let deleted = profile.collection(&collection)?.delete(criteria).await?;
            Ok(json!({ "deleted": deleted }))
        }
        Command::Collections => Ok(json!(profile.connector().collection_names())),
    }
}

fn parse_object(raw: Option<&str>) -> Result<Criteria> {
    match raw {
        None => Ok(Criteria::new()),
        Some(raw) => match serde_json::from_str(raw)? {
            Value::Object(map) => Ok(map),
            other => Err(CliError::InvalidInput(format!(
                "expected a JSON object, got {}",
                other
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SCHEMAS: &str = r#"[
        {
            "name": "users",
            "fields": {
                "id": {"type": "string", "primaryKey": true},
                "name": {"type": "string", "required": true},
                "email": {"type": "string", "unique": true}
            }
        },
        {
            "name": "notes",
            "fields": {
                "id": {"type": "number", "primaryKey": true, "autoIncrement": true},
                "body": {"type": "string", "required": true}
            }
        }
    ]"#;

    fn setup() -> (TempDir, StorageConfig, Vec<Schema>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemas.json");
        std::fs::write(&path, SCHEMAS).unwrap();
        let schemas = load_schemas(&path).unwrap();
        let config = StorageConfig {
            data_dir: dir.path().join("data"),
            ..StorageConfig::default()
        };
        (dir, config, schemas)
    }

    fn create(collection: &str, data: Value) -> Command {
        Command::Create {
            collection: collection.to_string(),
            data: data.to_string(),
        }
    }

    fn find(collection: &str, criteria: Option<Value>) -> Command {
        Command::Find {
            collection: collection.to_string(),
            criteria: criteria.map(|c| c.to_string()),
        }
    }

    #[test]
    fn schema_file_must_be_an_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schemas.json");
        std::fs::write(&path, r#"{"name": "users", "fields": {}}"#).unwrap();
        assert!(matches!(load_schemas(&path), Err(CliError::InvalidInput(_))));

        std::fs::write(&path, r#"[{"name": "users", "fields": {"id": {}}}]"#).unwrap();
        assert!(matches!(
            load_schemas(&path),
            Err(CliError::Engine(stowage_engine::Error::InvalidSchema(_)))
        ));

        assert!(matches!(
            load_schemas(&dir.path().join("missing.json")),
            Err(CliError::Io { .. })
        ));
    }

    #[tokio::test]
    async fn crud_roundtrip_on_both_backends() {
        for backend in [BackendKind::Flat, BackendKind::Structured] {
            let (_dir, config, schemas) = setup();
            let profile = Profile::open(backend, &config, schemas).await.unwrap();

            let created = run(&profile, create("users", json!({"id": "u1", "name": "Ada"})))
                .await
                .unwrap();
            assert_eq!(created, json!({"id": "u1", "name": "Ada"}));

            let updated = run(
                &profile,
                Command::Update {
                    collection: "users".into(),
                    data: json!({"id": "u1", "email": "ada@example.com"}).to_string(),
                },
            )
            .await
            .unwrap();
            assert_eq!(updated["email"], "ada@example.com");

            let found = run(&profile, find("users", Some(json!({"name": "Ada"}))))
                .await
                .unwrap();
            assert_eq!(found, json!([updated]));

            let deleted = run(
                &profile,
                Command::Delete {
                    collection: "users".into(),
                    criteria: None,
                },
            )
            .await
            .unwrap();
            assert_eq!(deleted, json!({"deleted": true}));
            assert_eq!(run(&profile, find("users", None)).await.unwrap(), json!([]));
        }
    }

    #[tokio::test]
    async fn data_persists_between_invocations() {
        let (_dir, config, schemas) = setup();
        {
            let profile = Profile::open(BackendKind::Structured, &config, schemas.clone())
                .await
                .unwrap();
            let note = run(&profile, create("notes", json!({"body": "first"})))
                .await
                .unwrap();
            assert_eq!(note["id"], 1);
            if let Profile::Structured(c) = &profile {
                c.engine().close().await;
            }
        }

        let profile = Profile::open(BackendKind::Structured, &config, schemas)
            .await
            .unwrap();
        let notes = run(&profile, find("notes", None)).await.unwrap();
        assert_eq!(notes, json!([{"id": 1, "body": "first"}]));
    }

    #[tokio::test]
    async fn input_errors_are_reported() {
        let (_dir, config, schemas) = setup();
        let profile = Profile::open(BackendKind::Flat, &config, schemas).await.unwrap();

        assert!(matches!(
            run(&profile, find("ghosts", None)).await,
            Err(CliError::UnknownCollection(name)) if name == "ghosts"
        ));
        assert!(matches!(
            run(&profile, find("users", Some(json!([1, 2])))).await,
            Err(CliError::InvalidInput(_))
        ));
        let err = run(
            &profile,
            Command::Create {
                collection: "users".into(),
                data: "{not json".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CliError::Json(_)));
        assert_eq!(err.exit_code(), 2);

        let err = run(&profile, create("users", json!({"id": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CliError::Engine(stowage_engine::Error::Validation { .. })
        ));
        assert_eq!(err.exit_code(), 1);
    }

    #[tokio::test]
    async fn lists_collections() {
        let (_dir, config, schemas) = setup();
        let profile = Profile::open(BackendKind::Flat, &config, schemas).await.unwrap();
        let names = run(&profile, Command::Collections).await.unwrap();
        assert_eq!(names, json!(["notes", "users"]));
    }
}
