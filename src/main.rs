use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use quorum_oracle::{
    api::{ApiState, create_router},
    config::OracleConfig,
    coordinator::RequestCoordinator,
    events::EventBus,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; refuses to start without an admin identity
    let config = OracleConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check the ORACLE_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting commit-reveal oracle");
    info!(
        "Protocol defaults: k={}, lambda_x100={}, audit_threshold_x10000={}, auditors={}, weights={}",
        config.protocol.k_observers,
        config.protocol.lambda_x100,
        config.protocol.audit_threshold_x10000,
        config.protocol.auditor_count,
        config.protocol.use_weights
    );
    if config.admin.selection_seed.is_some() {
        warn!("Committee selection uses a fixed seed; do not run this in production");
    }

    let coordinator = Arc::new(
        RequestCoordinator::from_config(&config).context("Failed to build coordinator")?,
    );
    spawn_event_logger(coordinator.events());

    let app = create_router(ApiState::new(coordinator)).layer(TraceLayer::new_for_http());

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", bind_addr, e))?;

    info!("Oracle server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Oracle server stopped");
    Ok(())
}

fn init_logging(config: &OracleConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_requests {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}

/// Mirror protocol events into the log
fn spawn_event_logger(events: &EventBus) {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => debug!(at = %record.at, event = ?record.event, "Oracle event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
