//! HTTP API handlers
//!
//! The command surface the tablet view layer talks to: read state, select
//! activities/devices, forward remote-control button presses.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::{MqttBus, SharedBus};
use crate::commands::DeviceCommand;
use crate::engine::{TheaterEngine, TheaterState};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engines: Arc<HashMap<String, Arc<TheaterEngine>>>,
    pub bus: SharedBus,
    pub mqtt: Option<Arc<MqttBus>>,
}

impl AppState {
    pub fn new(
        engines: HashMap<String, Arc<TheaterEngine>>,
        bus: SharedBus,
        mqtt: Option<Arc<MqttBus>>,
    ) -> Self {
        Self {
            engines: Arc::new(engines),
            bus,
            mqtt,
        }
    }

    fn engine(&self, title: &str) -> Option<&Arc<TheaterEngine>> {
        self.engines.get(title)
    }
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn not_found(what: &str, name: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("{} not found: {}", what, name),
        }),
    )
        .into_response()
}

/// General status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub theaters: usize,
    pub mqtt_connected: bool,
}

/// GET /status - Service health check
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let mqtt_connected = match &state.mqtt {
        Some(mqtt) => mqtt.get_status().await.connected,
        None => false,
    };

    Json(StatusResponse {
        service: "theater-control",
        version: env!("CARGO_PKG_VERSION"),
        theaters: state.engines.len(),
        mqtt_connected,
    })
}

/// GET /theaters - Configured theater titles
pub async fn theaters_handler(State(state): State<AppState>) -> Json<Vec<String>> {
    let mut titles: Vec<String> = state.engines.keys().cloned().collect();
    titles.sort();
    Json(titles)
}

/// GET /theaters/{title}/state - Selection plus observed telemetry snapshot
pub async fn theater_state_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
) -> impl IntoResponse {
    match state.engine(&title) {
        Some(engine) => {
            let snapshot: TheaterState = engine.state().await;
            (StatusCode::OK, Json(snapshot)).into_response()
        }
        None => not_found("Theater", &title),
    }
}

/// Selection request body
#[derive(Deserialize)]
pub struct SelectRequest {
    pub name: String,
}

/// POST /theaters/{title}/activity - Start an activity
pub async fn select_activity_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    let Some(engine) = state.engine(&title) else {
        return not_found("Theater", &title);
    };

    let Some(activity) = engine.catalog().activity(&req.name).cloned() else {
        return not_found("Activity", &req.name);
    };

    engine.select_activity(&activity).await;
    (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
}

/// POST /theaters/{title}/device - Focus a device
pub async fn select_device_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(req): Json<SelectRequest>,
) -> impl IntoResponse {
    let Some(engine) = state.engine(&title) else {
        return not_found("Theater", &title);
    };

    let Some(device) = engine.catalog().device_named(&req.name).cloned() else {
        return not_found("Device", &req.name);
    };

    engine.select_device(&device).await;
    (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
}

/// POST /theaters/{title}/command - Forward a remote-control button press
pub async fn send_command_handler(
    State(state): State<AppState>,
    Path(title): Path<String>,
    Json(command): Json<DeviceCommand>,
) -> impl IntoResponse {
    let Some(engine) = state.engine(&title) else {
        return not_found("Theater", &title);
    };

    match engine.send_command(&command).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::catalog::{Activity, ActivityInputs, Device, TheaterCatalog};
    use crate::persist::MemoryStore;

    fn test_state() -> AppState {
        let bus: SharedBus = Arc::new(MemoryBus::new());
        let store = Arc::new(MemoryStore::new());

        let catalog = TheaterCatalog::new(
            vec![Device {
                type_name: "lgtv".to_string(),
                physical_id: "aa".to_string(),
                display_name: "TV".to_string(),
            }],
            vec![Activity {
                name: "Watch TV".to_string(),
                default_device: "TV".to_string(),
                inputs: ActivityInputs::default(),
            }],
        );

        let engine = Arc::new(TheaterEngine::new(
            "Den",
            catalog,
            bus.clone(),
            store,
            "harmony",
        ));

        let mut engines = HashMap::new();
        engines.insert("Den".to_string(), engine);
        AppState::new(engines, bus, None)
    }

    #[tokio::test]
    async fn test_status_reports_engine_count() {
        let state = test_state();
        let response = status_handler(State(state)).await;
        assert_eq!(response.0.theaters, 1);
        assert!(!response.0.mqtt_connected);
    }

    #[tokio::test]
    async fn test_theaters_lists_titles() {
        let state = test_state();
        let response = theaters_handler(State(state)).await;
        assert_eq!(response.0, vec!["Den".to_string()]);
    }

    #[tokio::test]
    async fn test_select_activity_applies_to_engine() {
        let state = test_state();
        select_activity_handler(
            State(state.clone()),
            Path("Den".to_string()),
            Json(SelectRequest {
                name: "Watch TV".to_string(),
            }),
        )
        .await;

        let engine = state.engine("Den").unwrap();
        assert_eq!(engine.state().await.current_activity, "Watch TV");
    }

    #[tokio::test]
    async fn test_unknown_activity_is_a_no_op() {
        let state = test_state();
        select_activity_handler(
            State(state.clone()),
            Path("Den".to_string()),
            Json(SelectRequest {
                name: "Nope".to_string(),
            }),
        )
        .await;

        let engine = state.engine("Den").unwrap();
        assert_eq!(engine.state().await.current_activity, "All Off");
    }
}
