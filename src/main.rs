use std::sync::Arc;

use delivery_tracker::api;
use delivery_tracker::config::{Config, LogFormat};
use delivery_tracker::error::AppError;
use delivery_tracker::route::provider::{OfflineRouteProvider, PassthroughMapMatcher};
use delivery_tracker::state::AppState;
use delivery_tracker::store::run_position_persister;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Compact => subscriber.compact().init(),
    }

    let app_state = AppState::new(
        config.tracking_settings(),
        config.event_buffer_size,
        Arc::new(OfflineRouteProvider),
        Arc::new(PassthroughMapMatcher),
    );
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_position_persister(
        shared_state.store.clone(),
        shared_state.supervisor.subscribe(),
    ));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        tick_interval_ms = config.tick_interval_ms,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    shared_state.supervisor.stop_all().await;
    tracing::info!("tracking sessions stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
