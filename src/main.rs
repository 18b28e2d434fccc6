//! Theater Control - Rust Implementation
//!
//! An MQTT-driven control bridge for a home-theater tablet panel.

use theater_control::{api, bus, catalog, config, engine, persist};

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "theater_control=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Theater Control v{} ({})",
        env!("THEATER_VERSION"),
        env!("THEATER_GIT_SHA")
    );

    // Load configuration
    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, port: {}, theaters: {}",
        config.port,
        config.theaters.len()
    );

    // Connect the message bus
    let mqtt = Arc::new(bus::MqttBus::new());
    if let Some(ref mqtt_config) = config.mqtt {
        mqtt.configure(
            mqtt_config.host.clone(),
            Some(mqtt_config.port),
            mqtt_config.username.clone(),
            mqtt_config.password.clone(),
        )
        .await;

        if let Err(e) = mqtt.start().await {
            tracing::warn!("Failed to start MQTT bus: {}", e);
        } else {
            tracing::info!("MQTT bus started for {}", mqtt_config.host);
        }
    } else {
        tracing::warn!("No [mqtt] section configured; device telemetry is disabled");
    }
    let shared_bus: bus::SharedBus = mqtt.clone();

    // Selection store survives restarts in the data directory
    let store = Arc::new(persist::FileSelectionStore::new(config::get_data_dir()));

    // One engine per configured theater
    let mut engines: HashMap<String, Arc<engine::TheaterEngine>> = HashMap::new();
    for theater in &config.theaters {
        let catalog =
            catalog::TheaterCatalog::new(theater.devices.clone(), theater.activities.clone());
        let engine = Arc::new(engine::TheaterEngine::new(
            theater.title.clone(),
            catalog,
            shared_bus.clone(),
            store.clone(),
            config.commands.namespace.clone(),
        ));
        engine.mount().await?;
        engines.insert(theater.title.clone(), engine);
    }

    // Keep handles for shutdown; AppState owns its own map
    let engine_list: Vec<Arc<engine::TheaterEngine>> = engines.values().cloned().collect();
    let state = api::AppState::new(engines, shared_bus.clone(), Some(mqtt.clone()));

    // Build API routes
    let app = Router::new()
        .route("/status", get(api::status_handler))
        .route("/theaters", get(api::theaters_handler))
        .route("/theaters/{title}/state", get(api::theater_state_handler))
        .route(
            "/theaters/{title}/activity",
            post(api::select_activity_handler),
        )
        .route(
            "/theaters/{title}/device",
            post(api::select_device_handler),
        )
        .route(
            "/theaters/{title}/command",
            post(api::send_command_handler),
        )
        // Middleware
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server with graceful shutdown
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup: unmount engines, then drop the bus connection
    tracing::info!("Shutting down engines...");
    for engine in &engine_list {
        engine.unmount().await;
    }
    mqtt.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
