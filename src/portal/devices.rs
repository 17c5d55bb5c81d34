// src/portal/devices.rs — Device list and config-signal passthrough

use reqwest::Method;

use super::session::SessionManager;
use super::types::{DeviceListResponse, SetConfigSignalsResponse};
use crate::infra::errors::{BridgeError, Result};

pub const DEVICE_LIST_PATH: &str = "/rest/neteco/web/config/device/v1/device-list";
pub const SET_CONFIG_SIGNALS_PATH: &str = "/rest/pvms/web/device/v1/deviceExt/set-config-signals";

const DONGLE_TYPE: &str = "Dongle";

/// Query for the first page of devices under a station.
pub fn device_list_query(station_id: &str) -> Vec<(&'static str, String)> {
    vec![
        ("conditionParams.checkShareStationDn", station_id.to_string()),
        ("conditionParams.parentDn", station_id.to_string()),
        ("conditionParams.curPage", "1".into()),
        ("conditionParams.recordperpage", "10".into()),
        ("conditionParams.sortType", "BY_DEVICE_NAME".into()),
        ("conditionParams.maintenance", "false".into()),
    ]
}

/// `dn` of the first dongle in a device list.
pub fn find_dongle(list: &DeviceListResponse) -> Option<String> {
    list.data
        .iter()
        .find(|d| d.moc_type_name.as_deref() == Some(DONGLE_TYPE))
        .and_then(|d| d.dn.clone())
}

/// Form body for set-config-signals: the payload goes inside a JSON array.
pub fn config_signals_form(dongle_dn: &str, payload: &serde_json::Value) -> Vec<(&'static str, String)> {
    vec![
        ("dn", dongle_dn.to_string()),
        ("changeValues", format!("[{payload}]")),
    ]
}

/// Push configuration signals to the station dongle.
///
/// Returns `Ok(true)` when the portal answers with `code == 0`. A non-2xx
/// answer is logged and reported as `Ok(false)`.
pub async fn set_config_signals(session: &SessionManager, payload: &serde_json::Value) -> Result<bool> {
    let builder = session
        .request(Method::POST, SET_CONFIG_SIGNALS_PATH)
        .await?;
    let dongle = session.dongle_dn().await.ok_or_else(|| {
        BridgeError::protocol(SET_CONFIG_SIGNALS_PATH, "no dongle known for this station")
    })?;

    let resp = builder
        .form(&config_signals_form(&dongle, payload))
        .send()
        .await
        .map_err(|e| BridgeError::transport(SET_CONFIG_SIGNALS_PATH, e))?;

    if !resp.status().is_success() {
        tracing::warn!(
            "Portal rejected config signals (HTTP {})",
            resp.status().as_u16()
        );
        return Ok(false);
    }

    let body: SetConfigSignalsResponse = resp.json().await.map_err(|e| {
        BridgeError::protocol(SET_CONFIG_SIGNALS_PATH, format!("invalid JSON: {e}"))
    })?;
    let accepted = body.code == Some(0);
    tracing::info!("Config signals sent to dongle {dongle} (accepted: {accepted})");
    Ok(accepted)
}
