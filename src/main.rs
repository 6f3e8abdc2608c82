use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quota_gate::config::QuotaGateConfig;
use quota_gate::http::HttpServer;
use quota_gate::ratelimit::{DecisionService, SystemClock};

const DEFAULT_LOG_FILTER: &str = "quota_gate=info,tower_http=info";

/// Per-client request quota service.
#[derive(Debug, Parser)]
#[command(name = "quota-gate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "QUOTA_GATE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Quota Gate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = QuotaGateConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen {
        config.server.http_addr = addr;
    }
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        metered = config.store.is_metered(),
        "Configuration loaded"
    );

    let store = config.store.open_store()?;
    let service = DecisionService::with_clock(store, std::sync::Arc::new(SystemClock));

    HttpServer::new(&config, service)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("Quota Gate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
