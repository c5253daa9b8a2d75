//! FieldVoice API Library Crate
//!
//! This library contains the web service that bridges client WebSockets to a
//! live agent: configuration, shared state, conversation persistence, the REST
//! handlers, WebSocket session logic and routing. The binaries are thin
//! wrappers around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
