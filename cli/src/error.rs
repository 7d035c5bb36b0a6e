//! Unified error handling for the CLI.

use std::path::PathBuf;

/// CLI error type.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Storage error: {0}")]
    Engine(#[from] stowage_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] stowage_engine::ConfigError),

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Engine(stowage_engine::Error::Backend { .. }) | CliError::Io { .. } => 3,
            CliError::Engine(_) => 1,
            CliError::Config(_)
            | CliError::Json(_)
            | CliError::InvalidInput(_)
            | CliError::UnknownCollection(_) => 2,
        }
    }
}

/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, CliError>;
