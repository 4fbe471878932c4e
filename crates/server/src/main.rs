mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::Result;
use alcoguard_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use alcoguard_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging has to exist before bootstrap emits anything.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let router = routes::router(app.state.clone()).merge(health::router(app.health_state()));
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "alcoguard-server started"
    );
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "alcoguard-server stopping"
    );
    app.shutdown(grace).await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for ctrl-c; shutting down"
        );
    }
}
