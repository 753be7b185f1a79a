//! Domain types for the signal bus.
//!
//! Pure data: signal envelopes, configuration, correlation ids, payload
//! schemas and the server manifest. No I/O lives here.

pub mod config;
pub mod correlation;
pub mod manifest;
pub mod schema;
pub mod signal;

// Re-exports for convenience
pub use config::{BusConfig, ConfigError, DisconnectPolicy};
pub use correlation::{CorrelationId, CorrelationIdGenerator};
pub use manifest::{FunctionDirectory, Manifest};
pub use schema::{FieldKind, PayloadSchema, SchemaTable, SchemaViolation};
pub use signal::{NoDefault, Payload, SignalEnvelope};
