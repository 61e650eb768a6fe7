//! Raffle checkout server.
//!
//! Serves the HTTP API and runs the sweep scheduler until Ctrl-C or SIGTERM.

use anyhow::Context;
use raffle_core::environment::SystemClock;
use raffle_gateway::{EmailClient, EmailConfig, MercadoPagoConfig, MercadoPagoGateway, RetryPolicy};
use raffle_postgres::PgDatastore;
use raffle_server::scheduler::{Scheduler, SchedulerConfig};
use raffle_server::state::Security;
use raffle_server::{AppState, Config, build_router, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "raffle_server=info,raffle_core=info,raffle_gateway=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting raffle checkout server");

    let config = Config::from_env();
    info!(
        host = %config.server.host,
        port = config.server.port,
        public_base_url = %config.checkout.public_base_url,
        hold_minutes = config.checkout.hold_minutes,
        webhook_signatures = config.gateway.webhook_secret.is_some(),
        admin_enabled = config.operator_token.is_some(),
        "Configuration loaded"
    );

    let metrics_addr: SocketAddr = format!("{}:{}", config.server.metrics_host, config.server.metrics_port)
        .parse()
        .context("invalid metrics address")?;
    metrics::install(metrics_addr).context("failed to start metrics exporter")?;

    info!("Connecting to database...");
    let store = PgDatastore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;
    store.migrate().await.context("failed to run migrations")?;
    info!("Database ready");

    if config.gateway.access_token.is_empty() {
        warn!("GATEWAY_ACCESS_TOKEN is not set; checkout will fail at the gateway");
    }
    let gateway = MercadoPagoGateway::new(MercadoPagoConfig {
        api_url: config.gateway.api_url.clone(),
        access_token: config.gateway.access_token.clone(),
        timeout: std::time::Duration::from_millis(config.gateway.timeout_ms),
        retry: RetryPolicy::default(),
    })?;
    let notifier = EmailClient::new(EmailConfig {
        api_url: config.email.api_url.clone(),
        api_key: config.email.api_key.clone(),
        from: config.email.from.clone(),
        timeout: std::time::Duration::from_millis(config.email.timeout_ms),
    })?;
    let clock = Arc::new(SystemClock);

    let state = AppState::new(
        Arc::new(store),
        Arc::new(gateway),
        Arc::new(notifier),
        clock.clone(),
        config.reservation_config(),
        config.sweeper_config(),
        Security {
            webhook_secret: config.gateway.webhook_secret.clone(),
            operator_token: config.operator_token.clone(),
        },
    );

    let scheduler = Scheduler::new(
        state.sweeper.clone(),
        state.engine.clone(),
        clock,
        SchedulerConfig {
            interval: std::time::Duration::from_secs(config.sweeper.interval_secs.max(1)),
            stale_after: config.stale_after(),
            stale_batch: config.sweeper.batch_size,
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, waiting for scheduler");
    if shutdown_tx.send(true).is_err() {
        warn!("Scheduler already stopped");
    }
    let timeout = std::time::Duration::from_secs(config.server.shutdown_timeout);
    match tokio::time::timeout(timeout, scheduler_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Scheduler task failed"),
        Err(_) => warn!("Scheduler did not stop within the shutdown timeout"),
    }

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
///
/// If a handler cannot be installed it is logged and that signal is ignored.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
