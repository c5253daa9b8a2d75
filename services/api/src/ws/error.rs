//! How a session activity can end.

use fieldvoice_core::AgentError;
use std::fmt;

/// The three concurrent activities of an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Outbound,
    Inbound,
    Keepalive,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activity::Outbound => write!(f, "outbound relay"),
            Activity::Inbound => write!(f, "inbound relay"),
            Activity::Keepalive => write!(f, "keepalive"),
        }
    }
}

/// A normal end of an activity. None of these are reported as failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The client closed the connection, or a send/receive on it failed.
    ClientDisconnected,
    /// The agent's event stream ended.
    AgentExhausted,
    /// The keepalive could no longer write to the client.
    KeepaliveStopped,
    /// The activity observed the session's cancellation signal.
    Cancelled,
}

/// A fatal end of an activity. Any of these ends the whole session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("session activity panicked: {0}")]
    Panicked(String),
}

impl SessionError {
    /// A stable code for the error frame sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::MalformedEnvelope(_) => "malformed_envelope",
            SessionError::UnsupportedContentType(_) => "unsupported_content_type",
            SessionError::Agent(_) => "agent_error",
            SessionError::Encode(_) | SessionError::Panicked(_) => "internal_error",
        }
    }
}

pub type ActivityResult = Result<StopReason, SessionError>;
