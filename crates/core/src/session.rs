//! Session identity and lifecycle state.
//!
//! A session moves through `Initializing -> Active -> Draining -> Closed` and never
//! backwards. The only permitted skip is a failure during initialization, which
//! closes the session before any relay is started.

use crate::conversation::ConversationRecord;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// The response modality requested by the client when it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    /// Maps the `is_audio` connection flag onto a modality.
    pub fn from_audio_flag(is_audio: bool) -> Self {
        if is_audio { Modality::Audio } else { Modality::Text }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Modality::Text => write!(f, "text"),
            Modality::Audio => write!(f, "audio"),
        }
    }
}

impl FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Modality::Text),
            "audio" => Ok(Modality::Audio),
            other => Err(format!("unknown modality '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Initializing,
    Active,
    Draining,
    Closed,
}

/// Tracks the state of one session and rejects any transition that is not forward.
#[derive(Debug)]
pub struct Lifecycle {
    state: SessionState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initializing,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Moves to `next` if it is the immediate successor of the current state, or
    /// `Closed` from `Initializing`. Returns whether the transition happened.
    pub fn advance(&mut self, next: SessionState) -> bool {
        let allowed = matches!(
            (self.state, next),
            (SessionState::Initializing, SessionState::Active)
                | (SessionState::Initializing, SessionState::Closed)
                | (SessionState::Active, SessionState::Draining)
                | (SessionState::Draining, SessionState::Closed)
        );
        if allowed {
            tracing::debug!(from = ?self.state, to = ?next, "session state transition");
            self.state = next;
        }
        allowed
    }
}

/// Everything an agent runtime needs to know about the caller when a session starts.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: Uuid,
    pub user_id: String,
    pub modality: Modality,
    /// Caller profile as returned by the profile service, if one was found.
    pub profile: Option<serde_json::Value>,
    /// Most recent stored conversations for this caller, newest first.
    pub history: Vec<ConversationRecord>,
}

impl SessionContext {
    pub fn new(user_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            modality,
            profile: None,
            history: Vec::new(),
        }
    }

    /// Renders the profile and history as a context block that can be appended
    /// to an agent's instructions. Returns `None` when there is nothing to add.
    pub fn context_block(&self) -> Option<String> {
        if self.profile.is_none() && self.history.is_empty() {
            return None;
        }
        let mut block = format!("# Caller\n\nuser_id: {}\n", self.user_id);
        if let Some(profile) = &self.profile {
            let rendered =
                serde_json::to_string_pretty(profile).unwrap_or_else(|_| profile.to_string());
            block.push_str(&format!("\n## Profile\n```json\n{}\n```\n", rendered));
        }
        if !self.history.is_empty() {
            block.push_str("\n## Recent conversations\n");
            for record in &self.history {
                block.push_str(&format!("\n### {}\n", record.closed_at.to_rfc3339()));
                for turn in record.turns.iter().filter_map(|t| t.text().map(|s| (t.role, s))) {
                    block.push_str(&format!("- {}: {}\n", turn.0, turn.1));
                }
            }
        }
        Some(block)
    }
}
