//! Registration engine HTTP server.
//!
//! In-memory wallet and mock gateway; records live for the life of the process.

use anyhow::Context;
use registrations::payment::{InMemoryWallet, MockPaymentGateway};
use registrations::server::{AppState, build_router};
use registrations::{Config, PromotionScheduler, RegistrationEngine};
use rollcall_core::environment::SystemClock;
use rollcall_runtime::metrics::MetricsExporter;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},registrations=debug", config.server.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate().context("invalid configuration")?;
    info!(
        address = %config.bind_address(),
        refund_window_days = config.policy.refund_window_days,
        payment_window_days = config.policy.payment_window_days,
        "Configuration loaded"
    );

    let metrics = MetricsExporter::install().context("failed to install metrics exporter")?;

    let engine = Arc::new(RegistrationEngine::from_config(
        &config,
        Arc::new(SystemClock),
        InMemoryWallet::shared(),
        MockPaymentGateway::shared(),
    ));
    let scheduler = PromotionScheduler::spawn(Arc::clone(&engine), config.sweep_interval());

    let app = build_router(AppState::new(Arc::clone(&engine), metrics));
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    info!(address = %config.bind_address(), "HTTP server listening for requests");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, draining event stores");
    scheduler.stop().await;
    if let Err(error) = engine.shutdown(config.shutdown_timeout()).await {
        warn!(%error, "Event stores did not drain before the timeout");
    }

    let pending = engine.dead_letters();
    if !pending.is_empty() {
        warn!(count = pending.len(), "Exiting with operations awaiting manual reconciliation");
    }
    info!("Graceful shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!(%error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(error) => {
                warn!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
