mod bootstrap;
mod health;
mod routes;

use std::time::Duration;

use anyhow::{Context, Result};
use idguard_core::config::{AppConfig, LoadOptions, LogFormat};
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let server = &app.config.server;
    let address = format!("{}:{}", server.bind_address, server.port);
    let grace = Duration::from_secs(server.graceful_shutdown_secs);

    let router = routes::router(app.state.clone(), server.max_upload_bytes)
        .merge(health::router(app.db_pool.clone(), app.state.runtime.model_id()));
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        upload_dir = %server.upload_dir.display(),
        "idguard-server listening"
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut serving = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal?,
        finished = &mut serving => {
            finished??;
            return Ok(());
        }
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = grace.as_secs(),
        "draining in-flight requests"
    );
    let _ = stop_tx.send(());
    match tokio::time::timeout(grace, serving).await {
        Ok(joined) => joined??,
        Err(_) => tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "in-flight requests did not finish before the grace period"
        ),
    }

    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", correlation_id = "shutdown", "idguard-server stopped");
    Ok(())
}
