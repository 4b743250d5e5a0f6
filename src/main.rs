use std::sync::Arc;

use courier_dispatch::api;
use courier_dispatch::config::Config;
use courier_dispatch::engine::coordinator::run_dispatch_loop;
use courier_dispatch::error::AppError;
use courier_dispatch::observability::logging::init_tracing;
use courier_dispatch::state::AppState;
use courier_dispatch::store::{AssignmentStore, MemoryStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    init_tracing(&config.log_level, config.log_format);

    let store: Arc<dyn AssignmentStore> = match &config.database_url {
        Some(url) => {
            let store = SqliteStore::connect(
                url,
                config.database_max_connections,
                config.dispatch.store_timeout,
            )
            .await
            .map_err(|err| AppError::Internal(format!("failed to open store: {err}")))?;
            tracing::info!(database_url = %url, "using sqlite store");
            Arc::new(store)
        }
        None => {
            tracing::info!("DATABASE_URL not set; using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let (app_state, event_rx) = AppState::new(
        store,
        config.dispatch.clone(),
        config.event_queue_size,
        config.channel_buffer_size,
    );
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_dispatch_loop(
        shared_state.coordinator.clone(),
        event_rx,
    ));

    let app = api::rest::router(shared_state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        radius_meters = config.dispatch.radius_meters,
        candidate_limit = config.dispatch.candidate_limit,
        "http server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
