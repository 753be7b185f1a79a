//! Bus configuration with validation.

use crate::transport::backoff::BackoffPolicy;
use crate::DEFAULT_HEARTBEAT;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

/// What happens to in-flight calls when the connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Keep pending calls; the server is trusted to answer after reconnect.
    #[default]
    Retain,
    /// Reject every pending call with `CallError::ConnectionReset` and
    /// withdraw invocation frames that were never written.
    RejectPending,
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid endpoint {0:?}: expected a ws:// or wss:// URL")]
    InvalidEndpoint(String),

    #[error("Heartbeat sentinel cannot be empty")]
    EmptyHeartbeat,

    #[error("Invalid reconnect policy: {0}")]
    InvalidBackoff(String),

    #[error("Failed to read configuration file: {0}")]
    Io(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Main bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// WebSocket endpoint. `None` runs a local-only bus with no transport.
    pub endpoint: Option<String>,
    /// Signed window token, sent as the `token` query parameter.
    pub token: Option<String>,
    /// Heartbeat sentinel echoed back verbatim.
    pub heartbeat: String,
    /// Emit dispatch traces at info level.
    pub debug: bool,
    /// CSRF token for form collaborators. Never used by the bus itself.
    pub csrf_token: Option<String>,
    /// Reconnection strategy.
    pub reconnect: BackoffPolicy,
    /// Fate of in-flight calls on disconnect.
    pub disconnect_policy: DisconnectPolicy,
    /// Reject invocations of functions absent from the manifest.
    pub strict_functions: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            heartbeat: DEFAULT_HEARTBEAT.to_string(),
            debug: false,
            csrf_token: None,
            reconnect: BackoffPolicy::default(),
            disconnect_policy: DisconnectPolicy::default(),
            strict_functions: false,
        }
    }
}

impl BusConfig {
    /// Default configuration pointed at an endpoint.
    pub fn for_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..Self::default()
        }
    }

    /// Build configuration from environment variables over defaults.
    ///
    /// # Environment Variables
    ///
    /// - `SIGNAL_BUS_ENDPOINT`: WebSocket URL
    /// - `SIGNAL_BUS_TOKEN`: window token
    /// - `SIGNAL_BUS_HEARTBEAT`: heartbeat sentinel (default: `--HEARTBEAT--`)
    /// - `SIGNAL_BUS_DEBUG`: verbose dispatch traces (default: false)
    /// - `SIGNAL_BUS_RECONNECT_MS`: constant reconnect delay (default: 3000)
    /// - `SIGNAL_BUS_REJECT_ON_DISCONNECT`: reject pending calls on drop (default: false)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(endpoint) = env::var("SIGNAL_BUS_ENDPOINT") {
            config.endpoint = Some(endpoint);
        }
        if let Ok(token) = env::var("SIGNAL_BUS_TOKEN") {
            config.token = Some(token);
        }
        if let Ok(heartbeat) = env::var("SIGNAL_BUS_HEARTBEAT") {
            config.heartbeat = heartbeat;
        }
        if let Ok(flag) = env::var("SIGNAL_BUS_DEBUG") {
            config.debug = is_truthy(&flag);
        }
        if let Some(delay_ms) = env::var("SIGNAL_BUS_RECONNECT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.reconnect = BackoffPolicy::constant(delay_ms);
        }
        if let Ok(flag) = env::var("SIGNAL_BUS_REJECT_ON_DISCONNECT") {
            if is_truthy(&flag) {
                config.disconnect_policy = DisconnectPolicy::RejectPending;
            }
        }

        config
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json(&text)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
                return Err(ConfigError::InvalidEndpoint(endpoint.clone()));
            }
        }

        if self.heartbeat.is_empty() {
            return Err(ConfigError::EmptyHeartbeat);
        }

        self.reconnect.validate()?;

        Ok(())
    }

    /// Endpoint URL with the window token appended, if any.
    pub fn connection_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_ref()?;
        let Some(token) = &self.token else {
            return Some(endpoint.clone());
        };
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        Some(format!("{endpoint}{separator}token={token}"))
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
