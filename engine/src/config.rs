//! Storage configuration loaded from environment variables.

use crate::keys::KeyGenerator;
use std::env;
use std::path::PathBuf;

/// Where and how connectors persist their data.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory holding the SQLite file and the flat store
    pub data_dir: PathBuf,
    /// Structured database name; the file is `<data_dir>/<store_name>.sqlite3`
    pub store_name: String,
    /// Initial structured database version
    pub version: u32,
    /// Key prefix for the flat backend
    pub namespace: String,
    pub key_strategy: KeyGenerator,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            store_name: "stowage".to_string(),
            version: 1,
            namespace: "stowage".to_string(),
            key_strategy: KeyGenerator::Random,
        }
    }
}

impl StorageConfig {
    /// Load configuration from `STOWAGE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let data_dir = lookup("STOWAGE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let store_name = lookup("STOWAGE_STORE_NAME").unwrap_or(defaults.store_name);
        if store_name.trim().is_empty() {
            return Err(ConfigError::EmptyStoreName);
        }

        let version = match lookup("STOWAGE_VERSION") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or(ConfigError::InvalidVersion(raw))?,
            None => defaults.version,
        };

        let namespace = lookup("STOWAGE_NAMESPACE").unwrap_or(defaults.namespace);

        let key_strategy = match lookup("STOWAGE_KEY_STRATEGY") {
            Some(raw) => raw
                .parse::<KeyGenerator>()
                .map_err(|_| ConfigError::InvalidKeyStrategy(raw))?,
            None => defaults.key_strategy,
        };

        Ok(Self {
            data_dir,
            store_name,
            version,
            namespace,
            key_strategy,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STOWAGE_STORE_NAME must not be empty")]
    EmptyStoreName,

    #[error("Invalid STOWAGE_VERSION value: {0}")]
    InvalidVersion(String),

    #[error("Invalid STOWAGE_KEY_STRATEGY value: {0}")]
    InvalidKeyStrategy(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<StorageConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StorageConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_variables() {
        assert_eq!(load(&[]).unwrap(), StorageConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = load(&[
            ("STOWAGE_DATA_DIR", "/var/lib/app"),
            ("STOWAGE_STORE_NAME", "inventory"),
            ("STOWAGE_VERSION", "7"),
            ("STOWAGE_NAMESPACE", "inv"),
            ("STOWAGE_KEY_STRATEGY", "timestamp"),
        ])
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/app"));
        assert_eq!(config.store_name, "inventory");
        assert_eq!(config.version, 7);
        assert_eq!(config.namespace, "inv");
        assert_eq!(config.key_strategy, KeyGenerator::Timestamp);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("STOWAGE_VERSION", "0")]),
            Err(ConfigError::InvalidVersion(v)) if v == "0"
        ));
        assert!(matches!(
            load(&[("STOWAGE_VERSION", "two")]),
            Err(ConfigError::InvalidVersion(_))
        ));
        assert!(matches!(
            load(&[("STOWAGE_KEY_STRATEGY", "sequential")]),
            Err(ConfigError::InvalidKeyStrategy(_))
        ));
        assert!(matches!(
            load(&[("STOWAGE_STORE_NAME", "  ")]),
            Err(ConfigError::EmptyStoreName)
        ));
    }
}
