//! # Signal Telemetry
//!
//! Log setup shared by signal bus processes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signal_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(&TelemetryConfig::from_env())?;
//!     // Logs from signal_bus are now written to stderr
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SIGNAL_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `SIGNAL_JSON_LOGS` | `false` | JSON lines output |
//! | `SIGNAL_CONSOLE_OUTPUT` | `true` | Write logs at all |
//! | `SIGNAL_SERVICE_NAME` | `signal-bus` | Service name in startup log |

mod config;

pub use config::TelemetryConfig;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("Failed to install subscriber: {0}")]
    SubscriberInit(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Build the log filter for a configuration.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter {
        filter: config.log_level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber.
///
/// Returns a guard that should be held for the lifetime of the process.
/// Fails if a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let layer: Option<BoxedLayer> = if !config.console_output {
        None
    } else if config.json_logs {
        // JSON output for containers/production
        Some(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(build_filter(config)?)
                .boxed(),
        )
    } else {
        // Pretty output for development
        Some(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_ansi(config.ansi)
                .with_filter(build_filter(config)?)
                .boxed(),
        )
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        filter = %config.log_level,
        json = config.json_logs,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name.clone(),
    })
}

/// Guard that keeps telemetry active. Logs the shutdown on drop.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
