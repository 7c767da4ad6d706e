//! jdx-ingest - judgment batch ingestion service
//!
//! `serve` (default) runs the HTTP API; `import` and `verify` run a single
//! operation against the local database and print the result as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jdx_common::config::{resolve_bind_address, RootFolderInitializer, RootFolderResolver, TomlConfig};
use jdx_common::events::EventBus;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use jdx_ingest::models::BatchSource;
use jdx_ingest::services::RuleTable;
use jdx_ingest::AppState;

const DEFAULT_LOG_FILTER: &str = "jdx_ingest=info,jdx_common=info,tower_http=info";

/// Command-line arguments for jdx-ingest
#[derive(Parser, Debug)]
#[command(name = "jdx-ingest")]
#[command(about = "Judgment batch ingestion and integrity reconciliation")]
#[command(version)]
struct Args {
    /// Root folder holding the database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, global = true, env = "JDX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:5780
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Ingest one file and print the batch summary
    Import {
        file: PathBuf,
        /// export_format_a, export_format_b, court_dump or manual
        #[arg(short, long)]
        source: BatchSource,
    },
    /// Recompute and print a batch's integrity record
    Verify { batch_id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = TomlConfig::load_or_default(args.config.as_deref());

    init_tracing(&config)?;

    let root_folder = RootFolderResolver::new(args.root_folder.clone())
        .with_toml(&config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = jdx_ingest::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let rules = RuleTable::from_config(&config.sources).context("Invalid [sources] config")?;
    let event_bus = EventBus::new(256);
    let state = AppState::new(db_pool, event_bus, config.ingest.clone(), rules);

    match args.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => serve(state, resolve_bind_address(bind.as_deref(), &config)).await,
        Command::Import { file, source } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());

            let summary = state.coordinator.submit_batch(&filename, &bytes, source).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Verify { batch_id } => {
            let record = state.coordinator.verifier().check_batch_integrity(batch_id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
    }
}

async fn serve(state: AppState, bind_address: String) -> Result<()> {
    info!("Starting jdx-ingest v{}", env!("CARGO_PKG_VERSION"));

    let recovered = state
        .coordinator
        .recover_interrupted_batches()
        .await
        .context("Startup recovery failed")?;
    if recovered > 0 {
        info!(recovered, "Marked interrupted batches as FAILED");
    }

    let app = jdx_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// RUST_LOG wins over `[logging] level`; `[logging] file` redirects output
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = config.logging.level.trim();
        if level.is_empty() || level == "info" {
            DEFAULT_LOG_FILTER.into()
        } else {
            level.into()
        }
    });

    let registry = tracing_subscriber::registry().with(filter);

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
