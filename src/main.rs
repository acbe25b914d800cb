//! CrustaScope Server - shrimp health monitoring
//!
//! Main entry point for the edge server.

use crustascope_server::{
    camera_device::{CameraOpener, FfmpegCameraOpener},
    classifier::InferenceEngine,
    inference_client::InferenceClient,
    snapshot_store::{MySqlSnapshotRepository, SnapshotRepository},
    state::{AppConfig, AppState},
    web_api,
};
use axum::http::HeaderValue;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Connect the snapshot database; None keeps the server running without persistence
async fn connect_snapshot_repository(config: &AppConfig) -> Option<Arc<dyn SnapshotRepository>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, snapshots will not be persisted");
        return None;
    };

    let pool = match MySqlPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Database connection failed, snapshots will not be persisted");
            return None;
        }
    };

    let repository = MySqlSnapshotRepository::new(pool);
    if let Err(e) = repository.ensure_schema().await {
        tracing::error!(error = %e, "Snapshot schema setup failed, snapshots will not be persisted");
        return None;
    }

    tracing::info!("Database connected");
    Some(Arc::new(repository))
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    layer.allow_origin(AllowOrigin::list(origins))
}

/// Wait for ctrl-c, then stop monitoring so live streams end and the camera is released
async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    state.controller.stop().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crustascope_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting CrustaScope server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        inference_url = %config.inference_url,
        model_name = %config.model_name,
        database_configured = config.database_url.is_some(),
        snap_cooldown_secs = config.snap_cooldown.as_secs_f64(),
        sensor_json = %config.latest_sensor_json.display(),
        camera_template = %config.camera.input_template,
        "Configuration loaded"
    );

    // Initialize components
    let inference: Arc<dyn InferenceEngine> = Arc::new(InferenceClient::new(
        config.inference_url.clone(),
        config.model_name.clone(),
        config.inference_timeout,
    )?);

    match inference.health_check().await {
        Ok(true) => tracing::info!("Inference server reachable"),
        _ => tracing::warn!("Inference server not reachable yet, frames will be treated as no subject"),
    }

    let camera_opener: Arc<dyn CameraOpener> =
        Arc::new(FfmpegCameraOpener::new(config.camera.clone()));

    let repository = connect_snapshot_repository(&config).await;

    let state = AppState::build(config, inference, camera_opener, repository);

    // Create router
    let mut app = web_api::create_router(state.clone());

    if let Some(static_dir) = state.config.static_dir.as_ref() {
        app = app.fallback_service(ServeDir::new(static_dir));
        tracing::info!(static_dir = %static_dir.display(), "Static file serving enabled");
    }

    let app = app
        .layer(cors_layer(&state.config))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state.clone()))
        .await?;

    tracing::info!("Server stopped");

    Ok(())
}
