//! # Wire Protocol
//!
//! Text frames carrying one JSON object each.
//!
//! ## Outbound
//!
//! | Frame       | Shape                                   |
//! |-------------|-----------------------------------------|
//! | signal      | `{"signal": name, "opts": {...}}`       |
//! | invocation  | `{"func": name, "opts": {...}, "result_id": id}` |
//!
//! ## Inbound
//!
//! | Frame       | Shape                                          |
//! |-------------|------------------------------------------------|
//! | signal      | `{"signal": name, "opts": {...}, "signal_id": id}` |
//! | result      | `{"result_id": id, "result": value}`           |
//! | exception   | `{"result_id": id, "exception": value}`        |
//!
//! The heartbeat sentinel is a bare string and never reaches this module.

use crate::domain::correlation::CorrelationId;
use crate::domain::signal::{payload_from_value, Payload};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A signal pushed by the server.
    Signal {
        name: String,
        payload: Payload,
        /// Missing ids are reported as `None`; such frames are not dispatched.
        instance_id: Option<String>,
    },
    /// Successful completion of a call.
    Result {
        result_id: CorrelationId,
        value: Value,
    },
    /// Failed completion of a call.
    Exception {
        result_id: CorrelationId,
        error: Value,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    signal: Option<String>,
    #[serde(default)]
    opts: Value,
    signal_id: Option<String>,
    result_id: Option<String>,
    result: Option<Value>,
    #[serde(default)]
    exception: Value,
}

/// Only the fields needed to recognize an outbound invocation.
#[derive(Deserialize)]
struct OutboundRef {
    func: Option<serde::de::IgnoredAny>,
    result_id: Option<String>,
}

#[derive(Serialize)]
struct SignalFrame<'a> {
    signal: &'a str,
    opts: &'a Payload,
}

#[derive(Serialize)]
struct InvocationFrame<'a> {
    func: &'a str,
    opts: &'a Payload,
    result_id: &'a CorrelationId,
}

/// Decode one inbound text frame.
///
/// A frame with a `signal` field is a signal. Otherwise a frame with a
/// `result_id` is a call completion; a non-null `exception` takes precedence
/// over `result`.
pub fn decode(text: &str) -> Result<InboundFrame, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    if let Some(name) = raw.signal {
        let payload = payload_from_value(raw.opts.clone())
            .ok_or_else(|| ProtocolError::InvalidOpts(raw.opts.to_string()))?;
        return Ok(InboundFrame::Signal {
            name,
            payload,
            instance_id: raw.signal_id,
        });
    }

    let Some(result_id) = raw.result_id else {
        return Err(ProtocolError::Unrecognized);
    };
    let result_id = CorrelationId::from_wire(result_id);

    if !raw.exception.is_null() {
        return Ok(InboundFrame::Exception {
            result_id,
            error: raw.exception,
        });
    }

    Ok(InboundFrame::Result {
        result_id,
        value: raw.result.unwrap_or(Value::Null),
    })
}

/// Encode a locally fired signal for the server.
pub fn encode_signal(name: &str, payload: &Payload) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&SignalFrame {
        signal: name,
        opts: payload,
    })?)
}

/// Encode a remote function invocation.
pub fn encode_invocation(
    function: &str,
    payload: &Payload,
    result_id: &CorrelationId,
) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&InvocationFrame {
        func: function,
        opts: payload,
        result_id,
    })?)
}

/// Correlation id of an encoded invocation frame; `None` for any other frame.
pub fn invocation_id(frame: &str) -> Option<CorrelationId> {
    let raw: OutboundRef = serde_json::from_str(frame).ok()?;
    raw.func?;
    raw.result_id.map(CorrelationId::from_wire)
}
