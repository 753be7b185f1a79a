//! # Signal Bus Test Suite
//!
//! End-to-end flows between a `SignalBus` and a real WebSocket server
//! running in-process.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # In-process WebSocket server
//! └── integration/      # Bus ⇄ server flows
//!     ├── websocket_flows.rs
//!     └── resilience.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p signal-bus-tests
//! cargo test -p signal-bus-tests integration::resilience::
//! ```

pub mod integration;
pub mod support;
