//! Signal envelope and the "no default action" sentinel.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Signal arguments: a JSON object keyed by argument name.
pub type Payload = serde_json::Map<String, Value>;

/// One occurrence of a signal.
///
/// `instance_id` is only set for signals that originated remotely; it is the
/// key used for deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Dotted signal name, e.g. `html.content`.
    pub name: String,
    /// Signal arguments.
    pub payload: Payload,
    /// Per-delivery id of a remotely originated signal.
    pub instance_id: Option<String>,
}

impl SignalEnvelope {
    /// Envelope for a locally fired signal.
    pub fn local(name: impl Into<String>, payload: Payload) -> Self {
        Self {
            name: name.into(),
            payload,
            instance_id: None,
        }
    }

    /// Envelope for a signal delivered by the remote peer.
    pub fn remote(name: impl Into<String>, payload: Payload, instance_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload,
            instance_id: Some(instance_id.into()),
        }
    }

    /// Whether this envelope came from the network.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.instance_id.is_some()
    }
}

/// Returned by every dispatch.
///
/// Converts to `false` so it can be handed back directly as the result of a
/// UI event handler that must suppress the default action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NoDefault;

impl From<NoDefault> for bool {
    fn from(_: NoDefault) -> Self {
        false
    }
}

/// Convert a JSON value into a payload.
///
/// `null` becomes an empty payload; anything other than an object is `None`.
pub fn payload_from_value(value: Value) -> Option<Payload> {
    match value {
        Value::Object(map) => Some(map),
        Value::Null => Some(Payload::new()),
        _ => None,
    }
}
