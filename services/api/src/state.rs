//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the conversation store,
//! the agent runtime and the other services every session needs.

use crate::{config::Config, ws::registry::SessionRegistry};
use fieldvoice_core::{AgentRuntime, ConversationStore, profile::ProfileService};
use std::{sync::Arc, time::Instant};

/// The shared application state, created once at startup and passed to all handlers.
/// All fields are public to be accessible from other modules.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConversationStore>,
    pub runtime: Arc<dyn AgentRuntime>,
    pub profiles: Option<Arc<dyn ProfileService>>,
    pub sessions: Arc<SessionRegistry>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}
