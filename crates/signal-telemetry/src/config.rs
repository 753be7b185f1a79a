//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,

    /// Log filter directive (trace, debug, info, or `signal_bus=debug,info`)
    pub log_level: String,

    /// Whether to write logs to stderr at all
    pub console_output: bool,

    /// Whether to emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// Colored output for the human-readable format
    pub ansi: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "signal-bus".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
            ansi: true,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SIGNAL_SERVICE_NAME`: Service name (default: signal-bus)
    /// - `SIGNAL_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `SIGNAL_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `SIGNAL_JSON_LOGS`: Enable JSON logs (default: false, true in containers)
    /// - `NO_COLOR`: Disable colored output when set
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self {
            service_name: env::var("SIGNAL_SERVICE_NAME")
                .unwrap_or_else(|_| "signal-bus".to_string()),

            log_level: env::var("SIGNAL_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("SIGNAL_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: env::var("SIGNAL_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            ansi: env::var("NO_COLOR").is_err(),
        }
    }

    /// Configuration for a named tool, read from the environment.
    pub fn for_service(service_name: &str) -> Self {
        let mut config = Self::from_env();
        config.service_name = service_name.to_string();
        config
    }

    /// Raise the filter to `debug` unless a more specific filter was given.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        if verbose && self.log_level == "info" {
            self.log_level = "debug".to_string();
        }
        self
    }
}
