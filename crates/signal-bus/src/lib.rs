//! # Signal Bus - Client-Side Signal Dispatch
//!
//! Lets server and client code trigger named, loosely-coupled behaviors
//! ("signals") across a persistent duplex connection, and layers a
//! request/response call facility on the same connection.
//!
//! ## Architecture
//!
//! ```text
//!  collaborators (DOM handlers, notifications, form helpers)
//!        │ subscribe / fire / invoke
//!        ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                       SignalBus                          │
//! │                                                          │
//! │  ┌────────────────┐  ┌──────────────┐  ┌──────────────┐  │
//! │  │ SignalRegistry │  │ Deduplication│  │CallCorrelator│  │
//! │  │  name → [h..]  │  │    Ledger    │  │ f1 → pending │  │
//! │  └────────────────┘  └──────────────┘  └──────────────┘  │
//! │            ▲ inbound frames        outbound frames │     │
//! └────────────┼───────────────────────────────────────┼─────┘
//!              │                                       ▼
//!        ┌─────┴───────────────────────────────────────────┐
//!        │ Transport: Disconnected → Connecting → Open      │
//!        │ outbound buffer, heartbeat echo, reconnect       │
//!        └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Echo Rule
//!
//! A remote-bound signal is forwarded to the transport only when fired
//! locally. A firing that carries an instance id came from the network and
//! is never sent back.
//!
//! ## Usage
//!
//! ```ignore
//! use signal_bus::{BusConfig, SignalBus};
//!
//! let config = BusConfig::for_endpoint("ws://localhost:8000/ws/");
//! let bus = SignalBus::new(config)?;
//! bus.connect("html.content", |opts, _id| {
//!     println!("content: {:?}", opts.get("content"));
//!     Ok(())
//! });
//! bus.bind_remote("chat.message");
//! bus.start().await?;
//!
//! let answer = bus.invoke("demo.add", payload).await?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod bus;
pub mod domain;
pub mod error;
pub mod ledger;
pub mod pending;
pub mod protocol;
pub mod registry;
pub mod transport;

// Re-export main types
pub use bus::{BusStats, SignalBus, SignalStream};
pub use domain::config::{BusConfig, ConfigError, DisconnectPolicy};
pub use domain::correlation::CorrelationId;
pub use domain::manifest::{FunctionDirectory, Manifest};
pub use domain::schema::{FieldKind, PayloadSchema, SchemaTable, SchemaViolation};
pub use domain::signal::{NoDefault, Payload, SignalEnvelope};
pub use error::{BusError, CallError, ProtocolError, TransportError};
pub use ledger::DeduplicationLedger;
pub use pending::{CallCorrelator, PendingResult, PendingStats};
pub use registry::{HandlerId, SignalRegistry};
pub use transport::{
    BackoffPolicy, ConnectionState, Connector, FrameSink, FrameSource, Link, SendOutcome,
    Transport, TransportStats, WebSocketConnector,
};

/// Signal fired locally, exactly once, when the bus has finished starting.
pub const BOOTSTRAP_SIGNAL: &str = "df.bus.loaded";

/// Default heartbeat sentinel exchanged with the server.
pub const DEFAULT_HEARTBEAT: &str = "--HEARTBEAT--";

/// Default delay between reconnection attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Prefix of client-generated correlation ids.
pub const CORRELATION_PREFIX: &str = "f";
