// src/api/handlers.rs

use crate::api::{auth, types::*, ApiState};
use crate::monitor::diff::DeviceGroup;
use crate::monitor::Health;
use crate::portal::{devices, EnergyFlowSnapshot};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// GET /: What this server offers.
pub async fn index(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Capability>>, ApiError> {
    auth::check_auth(&state, &headers)?;

    Ok(Json(vec![
        Capability {
            url: "/",
            method: "GET",
            info: "This listing",
        },
        Capability {
            url: "/health",
            method: "GET",
            info: "Monitor health",
        },
        Capability {
            url: "/devices",
            method: "GET",
            info: "Devices derived from the station",
        },
        Capability {
            url: "/energy-flow",
            method: "GET",
            info: "Latest energy flow snapshot",
        },
        Capability {
            url: "/set-config-signals",
            method: "POST",
            info: "Forward configuration signals to the station dongle",
        },
    ]))
}

/// GET /health: 503 while degraded. Never requires a token.
pub async fn health(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    let status = state.status.borrow().clone();
    let code = match status.health {
        Health::Degraded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Health::Starting | Health::Healthy => StatusCode::OK,
    };
    (code, Json(HealthResponse::from(&status)))
}

/// GET /devices: One device per group, keyed by station id and suffix.
pub async fn list_devices(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<DeviceDescriptor>>, ApiError> {
    auth::check_auth(&state, &headers)?;

    let station = state
        .session
        .station()
        .await
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "Not logged in to the portal yet"))?;

    let devices = DeviceGroup::ALL
        .iter()
        .map(|group| DeviceDescriptor {
            id: group.device_id(&station.station_id, &state.devices),
            name: group.display_name().to_string(),
            kind: group.kind().to_string(),
            properties: group.fields().iter().map(|f| f.property()).collect(),
        })
        .collect();
    Ok(Json(devices))
}

/// GET /energy-flow: The last snapshot the monitor took.
pub async fn energy_flow(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<EnergyFlowSnapshot>, ApiError> {
    auth::check_auth(&state, &headers)?;

    let snapshot = state.status.borrow().snapshot;
    snapshot
        .map(Json)
        .ok_or_else(|| error(StatusCode::SERVICE_UNAVAILABLE, "No energy flow reading yet"))
}

/// POST /set-config-signals: Forward the body to the station dongle.
pub async fn set_config_signals(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ConfigSignalsResult>, ApiError> {
    auth::check_auth(&state, &headers)?;

    match devices::set_config_signals(&state.session, &body).await {
        Ok(result) => Ok(Json(ConfigSignalsResult { result })),
        Err(e) => {
            tracing::warn!("set-config-signals failed: {e}");
            Err(error(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
