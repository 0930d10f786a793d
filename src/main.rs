use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::{GateConfig, StorageConfig};
use tollgate::http::{GateServer, GateState};
use tollgate::ratelimit::{AdmissionEngine, CounterStore, LocalStore, SharedStore};

/// Fixed-window HTTP admission control.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
    }

    info!("Starting Tollgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = GateConfig::load(cli.config.as_deref())?;
    config.validate()?;
    info!(listen_addr = %config.server.listen_addr, "Configuration loaded");

    let mut local_store = None;
    let store: Arc<dyn CounterStore> = match &config.storage {
        StorageConfig::Local => {
            info!("Using local counter store");
            let local = Arc::new(LocalStore::new());
            local_store = Some(local.clone());
            local
        }
        StorageConfig::Shared(shared) => {
            info!(address = %shared.address, "Using shared counter store");
            Arc::new(SharedStore::connect(shared).await?)
        }
    };

    let engine = AdmissionEngine::new(config.limits.default_policy()?, store);
    for token_override in &config.limits.token_overrides {
        engine.set_override(
            &token_override.token,
            token_override.limit,
            token_override.block_duration(),
        )?;
    }
    info!(
        overrides = engine.registry().override_count(),
        "Admission engine initialized"
    );

    // Idle local counters are purged under the default policy's window.
    let janitor = local_store.map(|local| {
        LocalStore::spawn_janitor(
            &local,
            engine.registry().default_policy(),
            config.limits.purge_interval(),
        )
    });

    let state = GateState::new(Arc::new(engine), config.server.request_timeout());
    let server = GateServer::new(config.server.listen_addr, state);

    // Run the server with graceful shutdown on Ctrl+C
    let served = server.serve_with_shutdown(shutdown_signal()).await;
    if let Some(janitor) = janitor {
        janitor.abort();
    }
    served?;

    info!("Tollgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
