use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{info, warn};

use promptgate::api::routes::{create_router, AppState};
use promptgate::config::Config;
use promptgate::observability::init_tracing;
use promptgate::pipeline::Pipeline;
use promptgate::policy::{static_rules, RuleLoader, RuleWatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse();

    // Initialize tracing
    init_tracing(&config.log_level, config.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting promptgate moderation gateway"
    );

    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder, exporter disabled");
            None
        }
    };

    // Load rules; a bad rule file stops startup
    let loader = RuleLoader::new(&config.rules_path);
    let (rules_rx, watcher_handle) = match config.rules_reload_interval() {
        Some(interval) => {
            let (rx, handle) = RuleWatcher::new(loader, interval).start()?;
            (rx, Some(handle))
        }
        None => {
            let (doc, ruleset) = loader.load()?;
            info!(version = %doc.version, rules = ruleset.len(), "Loaded rule set, reloading disabled");
            (static_rules(ruleset), None)
        }
    };

    let pipeline = Arc::new(Pipeline::from_config(&config, rules_rx)?);

    // Create application state
    let state = Arc::new(AppState {
        pipeline,
        prometheus,
        start_time: Instant::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    // Create router
    let app = create_router(state);

    // Parse listen address
    let addr: SocketAddr = config.listen_addr.parse()?;

    info!(addr = %addr, mock_mode = config.mock_mode, "Starting HTTP server");

    // Create TCP listener
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Run server with graceful shutdown
    if config.graceful_shutdown {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        axum::serve(listener, app).await?;
    }

    // Cleanup
    info!("Shutting down...");
    if let Some(handle) = watcher_handle {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
}
