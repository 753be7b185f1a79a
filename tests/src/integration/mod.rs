//! Bus ⇄ server flows over a real WebSocket connection.

pub mod resilience;
pub mod websocket_flows;
