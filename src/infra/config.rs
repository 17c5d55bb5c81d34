// src/infra/config.rs — Configuration loading (TOML + environment overrides)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::infra::errors::BridgeError;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub portal: PortalConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub webhook: WebhookConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub flow_mapping: FlowMapping,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Login host, e.g. `eu5.fusionsolar.huawei.com`. A full base URL
    /// (`http://127.0.0.1:8080`) is accepted as well.
    pub host: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            host: None,
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// Hand-written so the password never ends up in a log line.
impl fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn default_request_timeout() -> u64 {
    30
}

/// Validated portal account settings.
#[derive(Clone)]
pub struct PortalCredentials {
    pub host: String,
    pub username: String,
    pub password: String,
    pub request_timeout_secs: u64,
}

impl fmt::Debug for PortalCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortalCredentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Receives one POST per changed snapshot field.
    pub url: Option<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub devices: DeviceSuffixes,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_webhook_timeout(),
            devices: DeviceSuffixes::default(),
        }
    }
}

fn default_webhook_timeout() -> u64 {
    10
}

/// Suffixes appended to the station id to build external device ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSuffixes {
    pub panels: String,
    pub battery: String,
    pub grid: String,
    pub house: String,
}

impl Default for DeviceSuffixes {
    fn default() -> Self {
        Self {
            panels: "_panels".into(),
            battery: "_battery".into(),
            grid: "_grid".into(),
            house: "_house".into(),
        }
    }
}

/// `[api]` section: the local HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token required on every route except `/health`.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
            token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

/// Semantic keys used to fold the portal's energy-flow graph into a snapshot.
///
/// Portal tenants have been seen to label nodes differently, so every key can
/// be overridden from `[flow_mapping]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMapping {
    pub load_node: String,
    pub battery_node: String,
    pub solar_node: String,
    pub grid_link: String,
    /// `toNode` value marking power flowing out to the grid.
    pub grid_export_to_node: String,
    pub battery_power_tip: String,
    pub battery_soc_tip: String,
}

impl Default for FlowMapping {
    fn default() -> Self {
        Self {
            load_node: "neteco.pvms.KPI.kpiView.electricalLoad".into(),
            battery_node: "neteco.pvms.devTypeLangKey.energy_store".into(),
            solar_node: "neteco.pvms.devTypeLangKey.string".into(),
            grid_link: "neteco.pvms.energy.flow.buy.power".into(),
            grid_export_to_node: "2".into(),
            battery_power_tip: "BATTERY_POWER".into(),
            battery_soc_tip: "SOC".into(),
        }
    }
}

impl Config {
    /// Load config from the default location (falling back to defaults),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, BridgeError> {
        let path = paths::config_file_path();
        let mut config = if path.exists() {
            Self::read_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load an explicit config file, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, BridgeError> {
        let mut config = Self::read_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("{}: {e}", path.display())))
    }

    pub fn apply_env(&mut self) -> Result<(), BridgeError> {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Apply `FUSIONSOLAR_*`, `SERVER_*`, `WEBHOOK_ENERGY_UPDATES` and `API_TOKEN` overrides.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("FUSIONSOLAR_HOST") {
            self.portal.host = Some(v);
        }
        if let Some(v) = get("FUSIONSOLAR_USERNAME") {
            self.portal.username = Some(v);
        }
        if let Some(v) = get("FUSIONSOLAR_PASSWORD") {
            self.portal.password = Some(v);
        }
        if let Some(v) = get("WEBHOOK_ENERGY_UPDATES") {
            self.webhook.url = Some(v);
        }
        if let Some(v) = get("API_TOKEN") {
            self.api.token = Some(v);
        }
        if let Some(v) = get("SERVER_BIND") {
            self.api.bind = v.trim().to_string();
        }
        if let Some(v) = get("SERVER_PORT") {
            self.api.port = v
                .trim()
                .parse()
                .map_err(|_| BridgeError::Config(format!("SERVER_PORT is not a port: {v}")))?;
        }
        if let Some(v) = get("SERVER_POLL_INTERVAL") {
            self.poll.interval_secs = v.trim().parse().map_err(|_| {
                BridgeError::Config(format!("SERVER_POLL_INTERVAL is not a number: {v}"))
            })?;
        }
        Ok(())
    }

    /// Portal account settings; all three values are required.
    pub fn portal_credentials(&self) -> Result<PortalCredentials, BridgeError> {
        fn required(value: &Option<String>, name: &str) -> Result<String, BridgeError> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| BridgeError::Config(format!("missing required setting: {name}")))
        }

        Ok(PortalCredentials {
            host: required(&self.portal.host, "portal.host")?,
            username: required(&self.portal.username, "portal.username")?,
            password: required(&self.portal.password, "portal.password")?,
            request_timeout_secs: self.portal.request_timeout_secs,
        })
    }

    /// Everything `serve` needs: credentials, webhook URL and a usable interval.
    pub fn validate_for_serve(&self) -> Result<PortalCredentials, BridgeError> {
        let credentials = self.portal_credentials()?;
        if self.webhook.url.as_deref().is_none_or(|u| u.trim().is_empty()) {
            return Err(BridgeError::Config(
                "missing required setting: webhook.url".into(),
            ));
        }
        if self.poll.interval_secs == 0 {
            return Err(BridgeError::Config(
                "poll.interval_secs must be greater than zero".into(),
            ));
        }
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_config() -> Config {
        let mut c = Config::default();
        c.portal.host = Some("eu5.fusionsolar.huawei.com".into());
        c.portal.username = Some("alice".into());
        c.portal.password = Some("s3cret".into());
        c.webhook.url = Some("http://homey.local/webhook".into());
        c
    }

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.poll.interval_secs, 60);
        assert_eq!(c.portal.request_timeout_secs, 30);
        assert_eq!(c.webhook.timeout_secs, 10);
        assert_eq!(c.api.port, 3000);
        assert_eq!(c.api.bind, "127.0.0.1");
        assert!(c.api.enabled);
        assert_eq!(c.webhook.devices.panels, "_panels");
        assert_eq!(c.flow_mapping.grid_export_to_node, "2");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.poll.interval_secs, 60);
        assert!(config.portal.host.is_none());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[portal]
host = "region01eu5.fusionsolar.huawei.com"
username = "alice"
password = "hunter2"
request_timeout_secs = 15

[poll]
interval_secs = 120

[webhook]
url = "http://homey.local/api/app/webhook"
timeout_secs = 3

[webhook.devices]
panels = "-pv"
battery = "-bat"
grid = "-grid"
house = "-home"

[api]
bind = "0.0.0.0"
port = 8080
token = "local-token"

[flow_mapping]
solar_node = "neteco.pvms.devTypeLangKey.inverter"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.portal.request_timeout_secs, 15);
        assert_eq!(config.poll.interval_secs, 120);
        assert_eq!(config.webhook.timeout_secs, 3);
        assert_eq!(config.webhook.devices.battery, "-bat");
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.api.token.as_deref(), Some("local-token"));
        assert_eq!(
            config.flow_mapping.solar_node,
            "neteco.pvms.devTypeLangKey.inverter"
        );
        // untouched keys keep their defaults
        assert_eq!(
            config.flow_mapping.grid_link,
            "neteco.pvms.energy.flow.buy.power"
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FUSIONSOLAR_HOST", "eu5.fusionsolar.huawei.com"),
            ("FUSIONSOLAR_USERNAME", "bob"),
            ("FUSIONSOLAR_PASSWORD", "pw"),
            ("SERVER_PORT", "4000"),
            ("SERVER_POLL_INTERVAL", "30"),
            ("WEBHOOK_ENERGY_UPDATES", "http://example.test/hook"),
        ]
        .into_iter()
        .collect();

        let mut c = Config::default();
        c.apply_env_with(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(c.portal.username.as_deref(), Some("bob"));
        assert_eq!(c.api.port, 4000);
        assert_eq!(c.poll.interval_secs, 30);
        assert_eq!(c.webhook.url.as_deref(), Some("http://example.test/hook"));
        assert!(c.validate_for_serve().is_ok());
    }

    #[test]
    fn test_env_bind_override() {
        let mut c = Config::default();
        c.apply_env_with(|_| None).unwrap();
        assert_eq!(c.api.bind, "127.0.0.1");

        c.apply_env_with(|k| (k == "SERVER_BIND").then(|| " 0.0.0.0 ".to_string()))
            .unwrap();
        assert_eq!(c.api.bind, "0.0.0.0");
        assert_eq!(c.api.port, 3000);
    }

    #[test]
    fn test_env_bad_number_is_config_error() {
        let mut c = Config::default();
        let err = c
            .apply_env_with(|k| (k == "SERVER_POLL_INTERVAL").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn test_missing_credentials_rejected() {
        let mut c = full_config();
        c.portal.password = None;
        let err = c.portal_credentials().unwrap_err();
        assert!(err.to_string().contains("portal.password"));

        let mut c = full_config();
        c.portal.host = Some("   ".into());
        assert!(c.portal_credentials().is_err());
    }

    #[test]
    fn test_serve_requires_webhook_and_interval() {
        let mut c = full_config();
        c.webhook.url = None;
        assert!(c.validate_for_serve().unwrap_err().to_string().contains("webhook.url"));

        let mut c = full_config();
        c.poll.interval_secs = 0;
        assert!(c.validate_for_serve().is_err());

        assert!(full_config().validate_for_serve().is_ok());
    }

    #[test]
    fn test_debug_hides_password() {
        let c = full_config();
        let rendered = format!("{:?}", c.portal);
        assert!(!rendered.contains("s3cret"));
        let creds = c.portal_credentials().unwrap();
        assert!(!format!("{creds:?}").contains("s3cret"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[poll]\ninterval_secs = 5\n").unwrap();
        let c = Config::read_file(&path).unwrap();
        assert_eq!(c.poll.interval_secs, 5);

        std::fs::write(&path, "[poll\n").unwrap();
        assert!(matches!(Config::read_file(&path), Err(BridgeError::Config(_))));
    }
}
