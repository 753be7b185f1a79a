//! Error types for the signal bus.

use crate::domain::config::ConfigError;
use serde_json::Value;
use thiserror::Error;

/// Errors raised by a connector or an open link.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Failed to receive frame: {0}")]
    Receive(String),

    #[error("Link closed")]
    Closed,
}

/// Errors decoding or encoding wire frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame opts must be an object, got {0}")]
    InvalidOpts(String),

    #[error("Unrecognized frame: no signal or result_id field")]
    Unrecognized,
}

/// Why a remote call did not produce a result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    /// The server answered with an exception payload.
    #[error("Remote call failed: {0}")]
    Remote(Value),

    /// The connection dropped while the call was pending.
    #[error("Connection reset before the call completed")]
    ConnectionReset,

    /// The function is not declared in the manifest.
    #[error("Unknown remote function: {0}")]
    UnknownFunction(String),

    /// The bus has no transport to carry the call.
    #[error("No transport configured")]
    NoTransport,

    /// The invocation frame could not be encoded.
    #[error("Failed to encode invocation: {0}")]
    Encoding(String),

    /// The bus shut down before the call completed.
    #[error("Call dropped")]
    Dropped,
}

/// Umbrella error for bus lifecycle operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Bus already started")]
    AlreadyStarted,
}
