//! Subcommand implementations.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use signal_bus::{ConnectionState, Payload, SignalBus, SignalEnvelope};
use tracing::info;

/// Parse a `--opts` argument into a payload.
pub fn parse_opts(text: &str) -> Result<Payload> {
    let value: Value = serde_json::from_str(text).context("--opts is not valid JSON")?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Payload::new()),
        other => anyhow::bail!("--opts must be a JSON object, got {other}"),
    }
}

/// One output line for a received signal.
pub fn envelope_line(envelope: &SignalEnvelope) -> String {
    json!({
        "signal": envelope.name,
        "opts": envelope.payload,
        "signal_id": envelope.instance_id,
    })
    .to_string()
}

/// Follow signals until Ctrl-C.
pub async fn listen(bus: &SignalBus, signals: &[String]) -> Result<()> {
    let streams: Vec<_> = signals.iter().map(|name| bus.watch(name)).collect();
    let mut merged = stream::select_all(streams);

    bus.start().await?;
    info!(signals = ?signals, "Listening");

    loop {
        tokio::select! {
            envelope = merged.next() => {
                let Some(envelope) = envelope else { break };
                println!("{}", envelope_line(&envelope));
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

/// Fire one signal, forwarding it whether or not the manifest bound it.
pub async fn fire(bus: &SignalBus, signal: &str, opts: &str, connect_timeout_ms: u64) -> Result<()> {
    let payload = parse_opts(opts)?;
    bus.bind_remote(signal);
    bus.start().await?;

    bus.fire(signal, payload);
    wait_open(bus, Duration::from_millis(connect_timeout_ms)).await?;
    info!(signal = signal, "Signal fired");
    Ok(())
}

/// Call a function and print its result as JSON.
pub async fn invoke(bus: &SignalBus, function: &str, opts: &str, timeout_ms: u64) -> Result<()> {
    let payload = parse_opts(opts)?;
    bus.start().await?;

    let pending = bus.invoke(function, payload);
    let result = tokio::time::timeout(Duration::from_millis(timeout_ms), pending)
        .await
        .with_context(|| format!("No answer from {function} within {timeout_ms} ms"))?
        .with_context(|| format!("Call to {function} failed"))?;

    println!("{result}");
    Ok(())
}

async fn wait_open(bus: &SignalBus, limit: Duration) -> Result<()> {
    tokio::time::timeout(limit, async {
        while bus.connection_state() != ConnectionState::Open {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .context("Connection did not open in time")
}
