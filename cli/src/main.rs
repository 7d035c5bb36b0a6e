//! Stowage CLI - inspect and edit schema-validated collections from a shell.
//!
//! Collections are declared in a JSON schema file and stored either in a
//! SQLite database or as flat JSON files, as configured by `STOWAGE_*`
//! environment variables.

mod commands;
mod error;

use crate::commands::{BackendKind, Command, Profile};
use crate::error::CliError;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use stowage_engine::StorageConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "stowage", version, about)]
struct Args {
    /// Storage backend
    #[arg(long, value_enum, env = "STOWAGE_BACKEND", default_value_t = BackendKind::Structured)]
    backend: BackendKind,

    /// JSON file holding an array of schema definitions
    #[arg(long, env = "STOWAGE_SCHEMAS")]
    schemas: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stowage_cli=info,stowage_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let args = Args::parse();

    match execute(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(args: Args) -> Result<(), CliError> {
    let config = StorageConfig::from_env()?;
    let schemas = commands::load_schemas(&args.schemas)?;

    tracing::info!(
        backend = ?args.backend,
        data_dir = %config.data_dir.display(),
        schemas = schemas.len(),
        "Opening storage profile"
    );
    let profile = Profile::open(args.backend, &config, schemas).await?;

    let output = commands::run(&profile, args.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    if let Profile::Structured(connector) = &profile {
        connector.engine().close().await;
    }
    Ok(())
}
