// src/portal/session.rs — Portal session lifecycle
//
// Owns the single login session against the FusionSolar portal:
//
//   DISCONNECTED ──login──▶ AUTHENTICATING ──▶ CONNECTED
//        ▲                        │                │
//        └──────── failure ───────┘◀── renew ──────┘
//
// The handshake is: public key → encrypted credentials → validateUser →
// manual redirect (data host + dp-session cookie) → CSRF bootstrap →
// station discovery. Every authenticated request refreshes the CSRF token
// first when it is older than five minutes. Nothing here retries or
// re-logs in after a failed request; renewal is the caller's decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{ACCEPT, COOKIE, LOCATION, ORIGIN, REFERER, SET_COOKIE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use tokio::sync::Mutex;
use url::Url;

use super::clock::{Clock, SystemClock};
use super::crypto;
use super::devices;
use super::types::{
    parse_number, scalar_to_string, DeviceListResponse, KeepAliveResponse, PubKeyResponse,
    StationListRequest, StationListResponse, ValidateUserRequest, ValidateUserResponse,
};
use crate::infra::config::PortalCredentials;
use crate::infra::errors::{BridgeError, LoginStage, Result};
use crate::infra::logger::redact;

const PUBKEY_PATH: &str = "/unisso/pubkey";
const VALIDATE_USER_PATH: &str = "/unisso/v3/validateUser.action";
const KEEP_ALIVE_PATH: &str = "/rest/dpcloud/auth/v1/keep-alive";
const STATION_LIST_PATH: &str = "/rest/pvms/web/station/v1/station/station-list";
const CLOUD_PAGE_PATH: &str = "/uniportal/pvmswebsite/assets/build/cloud.html";

/// Name of the CSRF header the portal expects.
pub const CSRF_HEADER: &str = "Roarand";
const SESSION_COOKIE: &str = "dp-session";

/// A CSRF token is trusted for this long after it was issued.
const CSRF_TTL_MS: i64 = 5 * 60 * 1000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// The monitored site, discovered once per login.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationIdentity {
    pub station_id: String,
    pub battery_capacity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CsrfToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
}

impl CsrfToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        (now - self.issued_at).num_milliseconds() <= CSRF_TTL_MS
    }
}

/// Read-only view of the session, for status output and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub connected: bool,
    pub session_cookie: Option<String>,
    pub csrf: Option<CsrfToken>,
    pub data_host: Option<String>,
    pub station: Option<StationIdentity>,
    pub dongle_dn: Option<String>,
}

#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    session_cookie: Option<String>,
    csrf: Option<CsrfToken>,
    /// `host[:port]` taken from the login redirect.
    data_host: Option<String>,
    /// `scheme://host[:port]` for building data-host URLs.
    data_base: Option<String>,
    station: Option<StationIdentity>,
    dongle_dn: Option<String>,
    /// Survives renewals: only seeded from the station list while unknown.
    battery_capacity: Option<f64>,
}

impl SessionState {
    fn reset(&mut self) {
        let battery_capacity = self.battery_capacity;
        *self = SessionState {
            battery_capacity,
            ..SessionState::default()
        };
    }

    fn info(&self) -> SessionInfo {
        SessionInfo {
            connected: self.connected,
            session_cookie: self.session_cookie.clone(),
            csrf: self.csrf.clone(),
            data_host: self.data_host.clone(),
            station: self.station.clone(),
            dongle_dn: self.dongle_dn.clone(),
        }
    }
}

struct PublicKeyMaterial {
    pem: String,
    time_stamp: String,
    version: String,
}

struct RedirectOutcome {
    data_base: String,
    data_host: String,
    session_cookie: String,
}

/// Manages the one authenticated session against the portal.
pub struct SessionManager {
    client: reqwest::Client,
    credentials: PortalCredentials,
    login_base: String,
    clock: Arc<dyn Clock>,
    state: Mutex<SessionState>,
}

impl SessionManager {
    pub fn new(credentials: PortalCredentials) -> Result<Self> {
        Self::with_clock(credentials, Arc::new(SystemClock))
    }

    pub fn with_clock(credentials: PortalCredentials, clock: Arc<dyn Clock>) -> Result<Self> {
        // Redirects are never followed automatically: the login redirect
        // carries the data host and the session cookie.
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(credentials.request_timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::Other(anyhow::anyhow!("building HTTP client: {e}")))?;

        Ok(Self {
            client,
            login_base: login_base(&credentials.host),
            credentials,
            clock,
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Log in unless a session is already established.
    pub async fn login(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Ok(());
        }
        self.login_locked(&mut state).await
    }

    /// Drop the current session and run the full handshake again.
    pub async fn renew_session(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        tracing::info!("Renewing portal session");
        state.reset();
        self.login_locked(&mut state).await
    }

    /// Build an authenticated request against the data host.
    ///
    /// Logs in first when there is no session, and refreshes the CSRF token
    /// when it is stale. The returned builder carries the session cookie and
    /// the CSRF header; status interpretation is left to the caller.
    pub async fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut state = self.state.lock().await;
        self.prepare_locked(&mut state).await?;
        self.authorized(&state, method, path)
    }

    /// Like [`request`](Self::request), also returning the station the
    /// request belongs to, read under the same lock.
    pub async fn station_request(
        &self,
        method: Method,
        path: &str,
    ) -> Result<(RequestBuilder, StationIdentity)> {
        let mut state = self.state.lock().await;
        self.prepare_locked(&mut state).await?;
        let station = state
            .station
            .clone()
            .ok_or_else(|| BridgeError::protocol(path, "no station discovered for this session"))?;
        Ok((self.authorized(&state, method, path)?, station))
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    pub async fn station(&self) -> Option<StationIdentity> {
        self.state.lock().await.station.clone()
    }

    pub async fn dongle_dn(&self) -> Option<String> {
        self.state.lock().await.dongle_dn.clone()
    }

    pub async fn info(&self) -> SessionInfo {
        self.state.lock().await.info()
    }

    // ── Handshake ────────────────────────────────────────────────────────

    async fn prepare_locked(&self, state: &mut SessionState) -> Result<()> {
        if !state.connected {
            tracing::debug!("No portal session, logging in");
            self.login_locked(state).await?;
        }
        self.refresh_csrf_locked(state).await
    }

    async fn login_locked(&self, state: &mut SessionState) -> Result<()> {
        match self.handshake(state).await {
            Ok(()) => {
                tracing::info!(
                    "Portal login complete (data host {}, station {})",
                    state.data_host.as_deref().unwrap_or("?"),
                    state
                        .station
                        .as_ref()
                        .map(|s| s.station_id.as_str())
                        .unwrap_or("?")
                );
                Ok(())
            }
            Err(e) => {
                state.reset();
                match &e {
                    BridgeError::Authentication {
                        stage: LoginStage::SessionCookie,
                        reason,
                    } => tracing::error!(
                        "Portal login contract changed, no session cookie in redirect: {reason}"
                    ),
                    other => tracing::error!("Portal login failed: {other}"),
                }
                Err(e)
            }
        }
    }

    async fn handshake(&self, state: &mut SessionState) -> Result<()> {
        state.reset();

        let key = self
            .fetch_public_key()
            .await
            .map_err(|e| e.at_stage(LoginStage::PublicKey))?;

        let nonce = crypto::generate_nonce();
        let encrypted = crypto::encrypt_password(&key.pem, &self.credentials.password)
            .map_err(|e| e.at_stage(LoginStage::Encrypt))?;
        let credential = format!("{encrypted}{}", key.version);

        let redirect_path = self
            .validate_user(&key.time_stamp, &nonce, &credential)
            .await?;

        let redirect = self.follow_redirect(&redirect_path).await?;

        state.connected = true;
        state.session_cookie = Some(redirect.session_cookie);
        state.data_host = Some(redirect.data_host);
        state.data_base = Some(redirect.data_base);

        self.refresh_csrf_locked(state)
            .await
            .map_err(|e| e.at_stage(LoginStage::Csrf))?;
        self.discover_station_locked(state)
            .await
            .map_err(|e| e.at_stage(LoginStage::StationDiscovery))?;

        if let Err(e) = self.discover_dongle_locked(state).await {
            tracing::warn!("Dongle discovery failed, config signals unavailable: {e}");
        }
        Ok(())
    }

    async fn fetch_public_key(&self) -> Result<PublicKeyMaterial> {
        let url = format!("{}{PUBKEY_PATH}", self.login_base);
        tracing::debug!("Fetching portal public key from {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BridgeError::transport(PUBKEY_PATH, e))?;
        if !resp.status().is_success() {
            return Err(BridgeError::PortalStatus {
                endpoint: PUBKEY_PATH.into(),
                status: resp.status().as_u16(),
            });
        }

        let body: PubKeyResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::protocol(PUBKEY_PATH, format!("invalid JSON: {e}")))?;

        let pem = body
            .pub_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| BridgeError::protocol(PUBKEY_PATH, "missing pubKey"))?;
        let time_stamp = body
            .time_stamp
            .as_ref()
            .and_then(scalar_to_string)
            .ok_or_else(|| BridgeError::protocol(PUBKEY_PATH, "missing timeStamp"))?;
        let version = body
            .version
            .ok_or_else(|| BridgeError::protocol(PUBKEY_PATH, "missing version"))?;

        Ok(PublicKeyMaterial {
            pem,
            time_stamp,
            version,
        })
    }

    /// POST the credentials; returns the relative redirect path.
    async fn validate_user(&self, time_stamp: &str, nonce: &str, credential: &str) -> Result<String> {
        let url = format!("{}{VALIDATE_USER_PATH}", self.login_base);
        let body = ValidateUserRequest {
            organization_name: "",
            password: credential,
            username: &self.credentials.username,
        };

        let resp = self
            .client
            .post(&url)
            .query(&[("timeStamp", time_stamp), ("nonce", nonce)])
            .header("x-requested-with", "XMLHttpRequest")
            .header(ORIGIN, self.login_base.as_str())
            .header(REFERER, format!("{}/unisso/login.action", self.login_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::transport(VALIDATE_USER_PATH, e).at_stage(LoginStage::Validate))?;

        if resp.status() != StatusCode::OK {
            return Err(BridgeError::Authentication {
                stage: LoginStage::Validate,
                reason: format!("portal rejected credentials (HTTP {})", resp.status().as_u16()),
            });
        }

        let body: ValidateUserResponse = resp.json().await.map_err(|e| {
            BridgeError::protocol(VALIDATE_USER_PATH, format!("invalid JSON: {e}"))
                .at_stage(LoginStage::Validate)
        })?;

        match body.redirect_path() {
            Some(path) => Ok(path.to_string()),
            None => {
                let detail = body
                    .error_msg
                    .clone()
                    .or_else(|| body.error_code.as_ref().and_then(scalar_to_string))
                    .unwrap_or_else(|| "no redirect in response".into());
                Err(BridgeError::Authentication {
                    stage: LoginStage::Validate,
                    reason: detail,
                })
            }
        }
    }

    async fn follow_redirect(&self, path: &str) -> Result<RedirectOutcome> {
        let url = format!("{}{path}", self.login_base);
        tracing::debug!("Following login redirect {url}");

        let resp = self
            .client
            .get(&url)
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header(
                REFERER,
                format!("{}/pvmswebsite/loginCustomize.html", self.login_base),
            )
            .send()
            .await
            .map_err(|e| BridgeError::transport(path, e).at_stage(LoginStage::Redirect))?;

        let status = resp.status();
        if status != StatusCode::OK && status != StatusCode::FOUND {
            return Err(BridgeError::Authentication {
                stage: LoginStage::Redirect,
                reason: format!("unexpected HTTP {} from login redirect", status.as_u16()),
            });
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| BridgeError::Authentication {
                stage: LoginStage::Redirect,
                reason: "redirect response has no Location header".into(),
            })?;
        let (data_base, data_host) =
            split_location(location).ok_or_else(|| BridgeError::Authentication {
                stage: LoginStage::Redirect,
                reason: format!("Location is not an absolute URL: {location}"),
            })?;

        let first_cookie = resp
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .next()
            .and_then(|v| v.to_str().ok());
        let session_cookie = first_cookie
            .and_then(extract_session_cookie)
            .ok_or_else(|| BridgeError::Authentication {
                stage: LoginStage::SessionCookie,
                reason: match first_cookie {
                    Some(_) => format!("{SESSION_COOKIE} not found in first Set-Cookie"),
                    None => "redirect response set no cookies".into(),
                },
            })?;

        Ok(RedirectOutcome {
            data_base,
            data_host,
            session_cookie,
        })
    }

    // ── CSRF ─────────────────────────────────────────────────────────────

    async fn refresh_csrf_locked(&self, state: &mut SessionState) -> Result<()> {
        let now = self.clock.now();
        if state.csrf.as_ref().is_some_and(|t| t.is_fresh(now)) {
            return Ok(());
        }
        state.csrf = None;

        let (base, cookie) = match (&state.data_base, &state.session_cookie) {
            (Some(base), Some(cookie)) if state.connected => (base, cookie),
            _ => {
                return Err(BridgeError::CsrfRefreshFailed(
                    "no active portal session".into(),
                ))
            }
        };

        let resp = self
            .client
            .get(format!("{base}{KEEP_ALIVE_PATH}"))
            .header(ACCEPT, "application/json, text/plain, */*")
            .header(REFERER, format!("{base}{CLOUD_PAGE_PATH}"))
            .header(COOKIE, session_cookie_header(cookie))
            .send()
            .await
            .map_err(|e| BridgeError::CsrfRefreshFailed(format!("keep-alive request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(BridgeError::CsrfRefreshFailed(format!(
                "keep-alive returned HTTP {}",
                resp.status().as_u16()
            )));
        }

        let body: KeepAliveResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::CsrfRefreshFailed(format!("invalid keep-alive JSON: {e}")))?;
        let token = body
            .payload
            .filter(|p| !p.is_empty())
            .ok_or_else(|| BridgeError::CsrfRefreshFailed("keep-alive response has no payload".into()))?;

        tracing::debug!("CSRF token refreshed ({})", redact(&token));
        state.csrf = Some(CsrfToken {
            value: token,
            issued_at: self.clock.now(),
        });
        Ok(())
    }

    fn authorized(&self, state: &SessionState, method: Method, path: &str) -> Result<RequestBuilder> {
        let (Some(base), Some(cookie), Some(csrf)) =
            (&state.data_base, &state.session_cookie, &state.csrf)
        else {
            return Err(BridgeError::protocol(path, "no active portal session"));
        };

        Ok(self
            .client
            .request(method, format!("{base}{path}"))
            .header(ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header(ORIGIN, base.as_str())
            .header(REFERER, format!("{base}{CLOUD_PAGE_PATH}"))
            .header(COOKIE, session_cookie_header(cookie))
            .header(CSRF_HEADER, csrf.value.as_str()))
    }

    // ── Discovery ────────────────────────────────────────────────────────

    async fn discover_station_locked(&self, state: &mut SessionState) -> Result<()> {
        self.refresh_csrf_locked(state).await?;

        let body = StationListRequest::newest_first(self.clock.now().timestamp_millis());
        let resp = self
            .authorized(state, Method::POST, STATION_LIST_PATH)?
            .json(&body)
            .send()
            .await
            .map_err(|e| BridgeError::transport(STATION_LIST_PATH, e))?;
        if !resp.status().is_success() {
            return Err(BridgeError::PortalStatus {
                endpoint: STATION_LIST_PATH.into(),
                status: resp.status().as_u16(),
            });
        }

        let list: StationListResponse = resp
            .json()
            .await
            .map_err(|e| BridgeError::protocol(STATION_LIST_PATH, format!("invalid JSON: {e}")))?;
        let first = list
            .data
            .and_then(|d| d.list.into_iter().next())
            .ok_or_else(|| BridgeError::protocol(STATION_LIST_PATH, "account has no stations"))?;
        let station_id = first
            .dn
            .filter(|dn| !dn.is_empty())
            .ok_or_else(|| BridgeError::protocol(STATION_LIST_PATH, "first station has no dn"))?;

        if state.battery_capacity.is_none_or(|c| c == 0.0) {
            state.battery_capacity = first.battery_capacity.as_ref().and_then(parse_number);
        }

        tracing::debug!(
            "Using station {station_id} ({})",
            first.station_name.as_deref().unwrap_or("unnamed")
        );
        state.station = Some(StationIdentity {
            station_id,
            battery_capacity: state.battery_capacity,
        });
        Ok(())
    }

    async fn discover_dongle_locked(&self, state: &mut SessionState) -> Result<()> {
        self.refresh_csrf_locked(state).await?;

        let station_id = state
            .station
            .as_ref()
            .map(|s| s.station_id.clone())
            .ok_or_else(|| BridgeError::protocol(devices::DEVICE_LIST_PATH, "no station"))?;

        let resp = self
            .authorized(state, Method::GET, devices::DEVICE_LIST_PATH)?
            .query(&devices::device_list_query(&station_id))
            .send()
            .await
            .map_err(|e| BridgeError::transport(devices::DEVICE_LIST_PATH, e))?;
        if !resp.status().is_success() {
            return Err(BridgeError::PortalStatus {
                endpoint: devices::DEVICE_LIST_PATH.into(),
                status: resp.status().as_u16(),
            });
        }

        let list: DeviceListResponse = resp.json().await.map_err(|e| {
            BridgeError::protocol(devices::DEVICE_LIST_PATH, format!("invalid JSON: {e}"))
        })?;
        state.dongle_dn = devices::find_dongle(&list);
        if state.dongle_dn.is_none() {
            tracing::warn!("No dongle device found for station {station_id}");
        }
        Ok(())
    }
}

/// `https://host` for a bare host name; full base URLs are kept as given.
fn login_base(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Split an absolute `Location` into (`scheme://authority`, `authority`).
fn split_location(location: &str) -> Option<(String, String)> {
    let url = Url::parse(location).ok()?;
    let host = url.host_str()?;
    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some((format!("{}://{authority}", url.scheme()), authority))
}

/// Find `dp-session=<value>` among the `;`-separated parts of a Set-Cookie.
fn extract_session_cookie(set_cookie: &str) -> Option<String> {
    set_cookie
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("dp-session="))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn session_cookie_header(cookie: &str) -> String {
    format!("locale=en-us; {SESSION_COOKIE}={cookie}")
}
