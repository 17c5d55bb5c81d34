// src/api/types.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::{Health, MonitorStatus};

/// One entry of the `GET /` capability listing.
#[derive(Debug, Serialize)]
pub struct Capability {
    pub url: &'static str,
    pub method: &'static str,
    pub info: &'static str,
}

/// `GET /health` body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&MonitorStatus> for HealthResponse {
    fn from(status: &MonitorStatus) -> Self {
        let (label, reason, since) = match &status.health {
            Health::Starting => ("starting", None, None),
            Health::Healthy => ("healthy", None, None),
            Health::Degraded { reason, since } => ("degraded", Some(reason.clone()), Some(*since)),
        };
        Self {
            status: label,
            reason,
            since,
            consecutive_failures: status.consecutive_failures,
            updated_at: status.updated_at,
        }
    }
}

/// A downstream device derived from the station.
#[derive(Debug, Serialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub properties: Vec<&'static str>,
}

/// `POST /set-config-signals` body.
#[derive(Debug, Serialize)]
pub struct ConfigSignalsResult {
    pub result: bool,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
