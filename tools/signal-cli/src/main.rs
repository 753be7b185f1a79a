//! signal-cli: command line client for signal bus endpoints.
//!
//! Connects to a signal endpoint with the same bus the browser side uses,
//! so it sees exactly what a page would.
//!
//! ## Usage
//!
//! ```bash
//! # Print server-pushed signals
//! signal-cli --endpoint ws://localhost:8000/ws/ listen html.content notify.show
//!
//! # Fire a remote-bound signal
//! signal-cli --endpoint ws://localhost:8000/ws/ fire chat.send --opts '{"text": "hi"}'
//!
//! # Call a remote function
//! signal-cli --endpoint ws://localhost:8000/ws/ invoke demo.add --opts '{"a": 40, "b": 2}'
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signal_bus::{BusConfig, Manifest, SignalBus};
use signal_telemetry::{init_telemetry, TelemetryConfig};

/// Signal bus command line client
#[derive(Parser, Debug)]
#[command(name = "signal-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint URL (overrides config file and SIGNAL_BUS_ENDPOINT)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Window token sent as the `token` query parameter
    #[arg(long)]
    token: Option<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSON manifest of forwardable signals and callable functions
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Verbose logging and dispatch traces
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every firing of the given signals as JSON lines
    Listen {
        /// Signal names to follow
        #[arg(required = true)]
        signals: Vec<String>,
    },

    /// Fire a signal and forward it to the server
    Fire {
        /// Signal name
        signal: String,

        /// Payload as a JSON object
        #[arg(long, default_value = "{}")]
        opts: String,

        /// How long to wait for the connection, in milliseconds
        #[arg(long, default_value = "5000")]
        connect_timeout_ms: u64,
    },

    /// Call a remote function and print its result
    Invoke {
        /// Dotted function name
        function: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        opts: String,

        /// How long to wait for the result, in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let telemetry = TelemetryConfig::for_service("signal-cli").with_verbose(args.verbose);
    let _guard = init_telemetry(&telemetry)?;

    let config = load_config(&args)?;
    let bus = SignalBus::new(config).context("Invalid bus configuration")?;

    if let Some(path) = &args.manifest {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let manifest: Manifest = serde_json::from_str(&text).context("Failed to parse manifest")?;
        bus.apply_manifest(&manifest);
    }

    let result = match args.command {
        Command::Listen { signals } => commands::listen(&bus, &signals).await,
        Command::Fire {
            signal,
            opts,
            connect_timeout_ms,
        } => commands::fire(&bus, &signal, &opts, connect_timeout_ms).await,
        Command::Invoke {
            function,
            opts,
            timeout_ms,
        } => commands::invoke(&bus, &function, &opts, timeout_ms).await,
    };

    bus.shutdown().await;
    result
}

/// Config file (or environment) first, then command line overrides.
fn load_config(args: &Args) -> Result<BusConfig> {
    let mut config = match &args.config {
        Some(path) => BusConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => BusConfig::from_env(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(token) = &args.token {
        config.token = Some(token.clone());
    }
    if args.verbose {
        config.debug = true;
    }
    if config.endpoint.is_none() {
        anyhow::bail!("No endpoint given: use --endpoint, a config file or SIGNAL_BUS_ENDPOINT");
    }

    Ok(config)
}
