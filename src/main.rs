//! stackwired: the Stackwire orchestrator daemon.
//!
//! Loads the catalogs, serves the Deploy API and runs the health monitor.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use stackwire::adapters::TomlConfigStore;
use stackwire::api;
use stackwire::ports::ConfigStore;
use stackwire::AppController;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capability wiring and deployment orchestrator")]
struct Args {
    /// Configuration file (defaults to stackwire.toml in the data directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for stored wiring, settings, targets and secrets
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address for the Deploy API, overriding `server.bind`
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level: trace, debug, info, warn or error
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_store = match args.data_dir {
        Some(dir) => TomlConfigStore::at(dir, args.config),
        None => TomlConfigStore::new().and_then(|store| match args.config {
            Some(path) => TomlConfigStore::at(store.data_dir(), Some(path)),
            None => Ok(store),
        }),
    }
    .context("failed to open configuration store")?;

    let controller = Arc::new(
        AppController::new(Arc::new(config_store), args.log_level)
            .context("failed to initialize stackwire")?,
    );

    let bind = match args.bind {
        Some(bind) => bind,
        None => controller
            .config()
            .server
            .bind
            .parse()
            .context("invalid server.bind address")?,
    };

    let background = controller.spawn_background();
    let app = api::router(controller.clone());

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!(addr = %listener.local_addr()?, "Deploy API listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    for task in background {
        task.abort();
    }
    if let Err(e) = served {
        error!(error = %e, "Deploy API server failed");
        return Err(e.into());
    }

    info!("Stackwire stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
