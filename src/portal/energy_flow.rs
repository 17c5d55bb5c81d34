// src/portal/energy_flow.rs — Station energy-flow reader
//
// The portal describes the live power flow as a small graph: nodes for the
// house load, the battery and the PV strings, and links between them. This
// module folds that graph into a flat five-field snapshot.

use std::sync::Arc;

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::session::SessionManager;
use super::types::{parse_number, EnergyFlowResponse, FlowGraph};
use crate::infra::config::FlowMapping;
use crate::infra::errors::{BridgeError, Result};

pub const ENERGY_FLOW_PATH: &str = "/rest/pvms/web/station/v2/overview/energy-flow";

/// One normalized reading of the station.
///
/// Sign conventions: `grid_flow_kw` is negative when exporting to the grid;
/// `battery_flow_kw` is reported as the portal gives it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyFlowSnapshot {
    pub grid_flow_kw: f64,
    pub battery_flow_kw: f64,
    pub battery_charge_level_pct: f64,
    pub house_consumption_kw: f64,
    pub solar_generation_kw: f64,
}

/// Fold the energy-flow graph into a snapshot.
///
/// Unknown nodes and links are ignored; fields nobody reported stay at zero.
pub fn fold_flow(graph: &FlowGraph, mapping: &FlowMapping) -> EnergyFlowSnapshot {
    let mut snapshot = EnergyFlowSnapshot::default();

    for node in &graph.nodes {
        if node.name == mapping.load_node {
            snapshot.house_consumption_kw = number_or_zero(&node.value, &node.name);
        } else if node.name == mapping.battery_node {
            let tip = |key: &str| {
                node.device_tips
                    .as_ref()
                    .and_then(|tips| tips.get(key))
                    .map(|v| number_or_zero(v, key))
                    .unwrap_or(0.0)
            };
            snapshot.battery_flow_kw = tip(&mapping.battery_power_tip);
            snapshot.battery_charge_level_pct = tip(&mapping.battery_soc_tip);
        } else if node.name == mapping.solar_node {
            snapshot.solar_generation_kw = number_or_zero(&node.value, &node.name);
        }
    }

    for link in &graph.links {
        if link.description.label != mapping.grid_link {
            continue;
        }
        let mut grid = number_or_zero(&link.description.value, &link.description.label);
        let to_node = match &link.to_node {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if to_node == mapping.grid_export_to_node {
            grid = -grid;
        }
        snapshot.grid_flow_kw = grid;
    }

    snapshot
}

fn number_or_zero(value: &serde_json::Value, what: &str) -> f64 {
    match parse_number(value) {
        Some(n) => n,
        None => {
            if !value.is_null() {
                tracing::debug!("Unreadable value for {what}: {value}");
            }
            0.0
        }
    }
}

/// Fetches energy-flow snapshots through the shared session.
pub struct EnergyFlowReader {
    session: Arc<SessionManager>,
    mapping: FlowMapping,
}

impl EnergyFlowReader {
    pub fn new(session: Arc<SessionManager>, mapping: FlowMapping) -> Self {
        Self { session, mapping }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// One authenticated read of the station's energy flow.
    ///
    /// A non-2xx answer is an error, never an all-zero snapshot.
    pub async fn get_energy_flow(&self) -> Result<EnergyFlowSnapshot> {
        let (builder, station) = self
            .session
            .station_request(Method::GET, ENERGY_FLOW_PATH)
            .await?;

        let resp = builder
            .query(&[("stationDn", station.station_id.as_str())])
            .send()
            .await
            .map_err(|e| BridgeError::transport(ENERGY_FLOW_PATH, e))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!("Energy flow request returned HTTP {}", status.as_u16());
            return Err(BridgeError::PortalStatus {
                endpoint: ENERGY_FLOW_PATH.into(),
                status: status.as_u16(),
            });
        }

        let body: EnergyFlowResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::protocol(ENERGY_FLOW_PATH, format!("invalid JSON: {e}")))?;
        let data = body
            .data
            .ok_or_else(|| BridgeError::protocol(ENERGY_FLOW_PATH, "response has no data"))?;

        Ok(fold_flow(&data.flow, &self.mapping))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn graph(value: serde_json::Value) -> FlowGraph {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_fold_solar_battery_and_export() {
        let g = graph(json!({
            "nodes": [
                { "name": "neteco.pvms.devTypeLangKey.string", "value": 3.2 },
                {
                    "name": "neteco.pvms.devTypeLangKey.energy_store",
                    "value": 1.5,
                    "deviceTips": { "BATTERY_POWER": "-1.5", "SOC": "87" }
                }
            ],
            "links": [
                {
                    "description": { "label": "neteco.pvms.energy.flow.buy.power", "value": "0.8" },
                    "toNode": "2"
                }
            ]
        }));

        let snapshot = fold_flow(&g, &FlowMapping::default());
        assert_eq!(
            snapshot,
            EnergyFlowSnapshot {
                solar_generation_kw: 3.2,
                battery_flow_kw: -1.5,
                battery_charge_level_pct: 87.0,
                grid_flow_kw: -0.8,
                house_consumption_kw: 0.0,
            }
        );
    }

    #[test]
    fn test_fold_grid_import_keeps_sign() {
        let g = graph(json!({
            "nodes": [
                { "name": "neteco.pvms.KPI.kpiView.electricalLoad", "value": "2.45" }
            ],
            "links": [
                {
                    "description": { "label": "neteco.pvms.energy.flow.buy.power", "value": "1.1 kW" },
                    "toNode": "3"
                }
            ]
        }));

        let snapshot = fold_flow(&g, &FlowMapping::default());
        assert_eq!(snapshot.house_consumption_kw, 2.45);
        assert_eq!(snapshot.grid_flow_kw, 1.1);
    }

    #[test]
    fn test_fold_numeric_to_node() {
        let g = graph(json!({
            "links": [
                {
                    "description": { "label": "neteco.pvms.energy.flow.buy.power", "value": 0.5 },
                    "toNode": 2
                }
            ]
        }));
        assert_eq!(fold_flow(&g, &FlowMapping::default()).grid_flow_kw, -0.5);
    }

    #[test]
    fn test_fold_ignores_unknown_entries() {
        let g = graph(json!({
            "nodes": [
                { "name": "neteco.pvms.devTypeLangKey.inverter", "value": 9.9 },
                { "name": "neteco.pvms.devTypeLangKey.energy_store", "value": 1.0 }
            ],
            "links": [
                {
                    "description": { "label": "neteco.pvms.energy.flow.input.power", "value": "4.0" },
                    "toNode": "1"
                }
            ]
        }));
        // battery node without deviceTips reads as zero
        assert_eq!(fold_flow(&g, &FlowMapping::default()), EnergyFlowSnapshot::default());
    }

    #[test]
    fn test_fold_skips_null_entries() {
        let g = graph(json!({
            "nodes": [
                { "name": null, "value": 9.9 },
                { "name": "neteco.pvms.devTypeLangKey.string", "value": 3.2 }
            ],
            "links": [
                { "description": null, "toNode": "2" },
                {
                    "description": { "label": "neteco.pvms.energy.flow.buy.power", "value": "0.8" },
                    "toNode": "2"
                }
            ]
        }));

        let snapshot = fold_flow(&g, &FlowMapping::default());
        assert_eq!(snapshot.solar_generation_kw, 3.2);
        assert_eq!(snapshot.grid_flow_kw, -0.8);
        assert_eq!(snapshot.house_consumption_kw, 0.0);
    }

    #[test]
    fn test_fold_empty_graph() {
        let g = FlowGraph::default();
        assert_eq!(fold_flow(&g, &FlowMapping::default()), EnergyFlowSnapshot::default());
    }

    #[test]
    fn test_fold_custom_mapping() {
        let mapping = FlowMapping {
            solar_node: "neteco.pvms.devTypeLangKey.inverter".into(),
            ..FlowMapping::default()
        };
        let g = graph(json!({
            "nodes": [
                { "name": "neteco.pvms.devTypeLangKey.inverter", "value": 4.4 },
                { "name": "neteco.pvms.devTypeLangKey.string", "value": 1.0 }
            ]
        }));
        assert_eq!(fold_flow(&g, &mapping).solar_generation_kw, 4.4);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(EnergyFlowSnapshot {
            grid_flow_kw: -0.8,
            ..EnergyFlowSnapshot::default()
        })
        .unwrap();
        assert_eq!(json["gridFlowKw"], -0.8);
        assert_eq!(json["batteryChargeLevelPct"], 0.0);
        assert_eq!(json["solarGenerationKw"], 0.0);
    }
}
