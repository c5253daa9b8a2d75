//! WebSocket Session Management
//!
//! This module contains the logic for bridging a client WebSocket to a live
//! agent. It is structured into submodules for clarity:
//!
//! - `protocol`: The JSON envelope format exchanged with the client.
//! - `bridge`: The outbound (agent to client) and inbound (client to agent) relays.
//! - `keepalive`: The periodic `ping` frame that keeps intermediaries from idling out.
//! - `coordinator`: Races the session's activities and drains the losers.
//! - `session`: The connection lifecycle, from upgrade to log flush.
//! - `registry`: The table of sessions currently open in this process.

pub mod bridge;
pub mod coordinator;
pub mod error;
pub mod keepalive;
pub mod protocol;
pub mod registry;
pub mod session;

pub use session::ws_handler;
