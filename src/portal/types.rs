// src/portal/types.rs — Wire types for the FusionSolar portal

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `GET /unisso/pubkey`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubKeyResponse {
    pub pub_key: Option<String>,
    /// Number on most tenants, string on some.
    pub time_stamp: Option<Value>,
    pub version: Option<String>,
}

/// `POST /unisso/v3/validateUser.action`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateUserRequest<'a> {
    pub organization_name: &'a str,
    pub password: &'a str,
    pub username: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct ValidateUserResponse {
    #[serde(rename = "respMultiRegionName")]
    pub resp_multi_region_name: Option<Vec<Value>>,
    #[serde(rename = "redirectURL")]
    pub redirect_url: Option<String>,
    #[serde(rename = "errorCode")]
    pub error_code: Option<Value>,
    #[serde(rename = "errorMsg")]
    pub error_msg: Option<String>,
}

impl ValidateUserResponse {
    /// Relative redirect path; the multi-region entry wins over `redirectURL`.
    pub fn redirect_path(&self) -> Option<&str> {
        self.resp_multi_region_name
            .as_ref()
            .and_then(|parts| parts.get(1))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .or_else(|| self.redirect_url.as_deref().filter(|p| !p.is_empty()))
    }
}

/// `GET /rest/dpcloud/auth/v1/keep-alive`
#[derive(Debug, Deserialize)]
pub struct KeepAliveResponse {
    pub payload: Option<String>,
}

/// `POST /rest/pvms/web/station/v1/station/station-list`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationListRequest {
    pub cur_page: u32,
    pub page_size: u32,
    pub grid_connected_time: String,
    pub query_time: i64,
    pub time_zone: i32,
    pub sort_id: String,
    pub sort_dir: String,
    pub locale: String,
}

impl StationListRequest {
    /// First page of ten stations, newest first.
    pub fn newest_first(query_time: i64) -> Self {
        Self {
            cur_page: 1,
            page_size: 10,
            grid_connected_time: String::new(),
            query_time,
            time_zone: 0,
            sort_id: "createTime".into(),
            sort_dir: "DESC".into(),
            locale: "en_US".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StationListResponse {
    pub data: Option<StationListData>,
}

#[derive(Debug, Deserialize)]
pub struct StationListData {
    #[serde(default)]
    pub list: Vec<StationEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationEntry {
    pub dn: Option<String>,
    pub station_name: Option<String>,
    pub battery_capacity: Option<Value>,
}

/// `GET /rest/neteco/web/config/device/v1/device-list`
#[derive(Debug, Deserialize)]
pub struct DeviceListResponse {
    #[serde(default)]
    pub data: Vec<DeviceEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceEntry {
    pub dn: Option<String>,
    pub moc_type_name: Option<String>,
    pub name: Option<String>,
}

/// `GET /rest/pvms/web/station/v2/overview/energy-flow`
#[derive(Debug, Deserialize)]
pub struct EnergyFlowResponse {
    pub data: Option<EnergyFlowData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EnergyFlowData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub flow: FlowGraph,
}

#[derive(Debug, Default, Deserialize)]
pub struct FlowGraph {
    #[serde(default, deserialize_with = "null_as_default")]
    pub nodes: Vec<FlowNode>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub links: Vec<FlowLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub device_tips: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowLink {
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: LinkDescription,
    #[serde(default)]
    pub to_node: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinkDescription {
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default)]
    pub value: Value,
}

/// `POST /rest/pvms/web/device/v1/deviceExt/set-config-signals`
#[derive(Debug, Deserialize)]
pub struct SetConfigSignalsResponse {
    pub code: Option<i64>,
}

/// Explicit `null` reads the same as a missing key.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read a portal number that may arrive as a JSON number or as a string,
/// optionally followed by a unit (`"1.5 kW"`). Anything else reads as `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.split_whitespace().next()?.parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Render a scalar JSON value the way it appears in a query string.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
