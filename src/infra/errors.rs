// src/infra/errors.rs — Error types for FusionBridge

use std::fmt;

use thiserror::Error;

/// Step of the portal login handshake, used to report where a login broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    PublicKey,
    Encrypt,
    Validate,
    Redirect,
    SessionCookie,
    Csrf,
    StationDiscovery,
}

impl fmt::Display for LoginStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoginStage::PublicKey => "public key fetch",
            LoginStage::Encrypt => "password encryption",
            LoginStage::Validate => "credential validation",
            LoginStage::Redirect => "login redirect",
            LoginStage::SessionCookie => "session cookie extraction",
            LoginStage::Csrf => "csrf bootstrap",
            LoginStage::StationDiscovery => "station discovery",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    // Portal errors
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {endpoint}: {message}")]
    Protocol { endpoint: String, message: String },

    #[error("Portal returned HTTP {status} for {endpoint}")]
    PortalStatus { endpoint: String, status: u16 },

    #[error("Login failed during {stage}: {reason}")]
    Authentication { stage: LoginStage, reason: String },

    #[error("CSRF token refresh failed: {0}")]
    CsrfRefreshFailed(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    // Infra
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub(crate) fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        BridgeError::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    pub(crate) fn protocol(endpoint: &str, message: impl Into<String>) -> Self {
        BridgeError::Protocol {
            endpoint: endpoint.to_string(),
            message: message.into(),
        }
    }

    /// Wrap a lower-level failure as a login failure at `stage`.
    pub(crate) fn at_stage(self, stage: LoginStage) -> Self {
        match self {
            already @ BridgeError::Authentication { .. } => already,
            other => BridgeError::Authentication {
                stage,
                reason: other.to_string(),
            },
        }
    }

    /// The failure happened while reaching the portal, not in what it answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, BridgeError::Transport { .. })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_stage_wraps_protocol_error() {
        let err = BridgeError::protocol("/unisso/pubkey", "missing pubKey").at_stage(LoginStage::PublicKey);
        match err {
            BridgeError::Authentication { stage, reason } => {
                assert_eq!(stage, LoginStage::PublicKey);
                assert!(reason.contains("missing pubKey"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_at_stage_keeps_first_stage() {
        let err = BridgeError::Authentication {
            stage: LoginStage::Redirect,
            reason: "no Location".into(),
        }
        .at_stage(LoginStage::Csrf);
        assert!(matches!(
            err,
            BridgeError::Authentication {
                stage: LoginStage::Redirect,
                ..
            }
        ));
    }

    #[test]
    fn test_display_includes_stage() {
        let err = BridgeError::Authentication {
            stage: LoginStage::SessionCookie,
            reason: "dp-session not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Login failed during session cookie extraction: dp-session not found"
        );
    }
}
