mod api;
mod bootstrap;
mod bridge;
mod health;

use std::time::Duration;

use anyhow::Result;
use chatpyme_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging(config: &AppConfig) {
    use chatpyme_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging needs the loaded config, so it comes first and bootstrap reuses the same config.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    tracing::info!(
        event_name = "system.server.telegram_transport_mode",
        transport_mode = app.transport_mode(),
        correlation_id = "bootstrap",
        "telegram runner transport mode initialized"
    );

    let router = app.router();
    let http = tokio::spawn(async move {
        axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await
    });

    let sessions = app.runtime.clone();
    let sweeper = tokio::spawn(async move {
        let mut ticks = tokio::time::interval(SESSION_SWEEP_INTERVAL);
        loop {
            ticks.tick().await;
            sessions.evict_idle_sessions().await;
        }
    });

    let runner = app.telegram_runner;
    let telegram = tokio::spawn(async move {
        if let Err(error) = runner.start().await {
            tracing::error!(
                event_name = "system.server.telegram_stopped",
                error = %error,
                "telegram runner terminated"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "chatpyme-server started"
    );

    match http.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::error!(
            event_name = "system.server.http_error",
            error = %error,
            "http server terminated unexpectedly"
        ),
        Err(error) => tracing::error!(
            event_name = "system.server.http_panicked",
            error = %error,
            "http server task failed"
        ),
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "chatpyme-server stopping"
    );
    sweeper.abort();
    telegram.abort();
    if tokio::time::timeout(grace, telegram).await.is_err() {
        tracing::warn!(
            event_name = "system.server.telegram_shutdown_timeout",
            "telegram runner did not stop within the grace period"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            error = %error,
            "could not listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
}
