//! The contract between a session and the conversational backend driving it.
//!
//! An [`AgentRuntime`] starts one live agent per session and hands back an
//! [`AgentHandle`] split into two halves: a [`LiveRequestQueue`] the inbound relay
//! writes to, and an [`AgentEventStream`] the outbound relay reads from.

use crate::session::SessionContext;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::mpsc;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent runtime failed to start: {0}")]
    Start(String),
    #[error("agent request queue is closed")]
    QueueClosed,
    #[error("agent runtime stream failed: {0}")]
    Stream(String),
}

/// One piece of content carried by an agent output event.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Text produced by the agent. `partial` marks an incremental chunk, as opposed
    /// to the aggregated text some runtimes repeat at the end of a turn.
    Text { text: String, partial: bool },
    /// Inline binary data, typically PCM audio.
    Inline { mime_type: String, data: Bytes },
}

/// A single output event from the agent runtime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentEvent {
    pub turn_complete: bool,
    pub interrupted: bool,
    pub content: Vec<Fragment>,
}

impl AgentEvent {
    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Default::default()
        }
    }

    pub fn interrupted() -> Self {
        Self {
            interrupted: true,
            ..Default::default()
        }
    }

    pub fn partial_text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Fragment::Text {
                text: text.into(),
                partial: true,
            }],
            ..Default::default()
        }
    }

    pub fn audio(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            content: vec![Fragment::Inline {
                mime_type: mime_type.into(),
                data: data.into(),
            }],
            ..Default::default()
        }
    }

    /// The first content fragment, which is the only one the bridge inspects.
    pub fn leading_fragment(&self) -> Option<&Fragment> {
        self.content.first()
    }
}

/// A lazy, unbounded sequence of agent output events.
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, AgentError>> + Send>>;

/// Inputs queued for the live agent.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveRequest {
    /// A complete user turn.
    Text(String),
    /// A chunk of real-time audio.
    Audio(Bytes),
    /// No further input will follow; the runtime should wind down.
    Close,
}

/// The write half of an agent handle.
///
/// Sends never block. `close` is idempotent: only the first call enqueues
/// [`LiveRequest::Close`].
#[derive(Debug, Clone)]
pub struct LiveRequestQueue {
    tx: mpsc::UnboundedSender<LiveRequest>,
    closed: Arc<AtomicBool>,
}

impl LiveRequestQueue {
    /// Creates a queue and the receiver a runtime implementation drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LiveRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), AgentError> {
        self.send(LiveRequest::Text(text.into()))
    }

    pub fn send_audio_chunk(&self, chunk: impl Into<Bytes>) -> Result<(), AgentError> {
        self.send(LiveRequest::Audio(chunk.into()))
    }

    /// Signals the runtime that the session is over. Returns `true` only for the
    /// call that actually closed the queue.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        // The runtime may already be gone; closing is still complete from our side.
        let _ = self.tx.send(LiveRequest::Close);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn send(&self, request: LiveRequest) -> Result<(), AgentError> {
        if self.is_closed() {
            return Err(AgentError::QueueClosed);
        }
        self.tx.send(request).map_err(|_| AgentError::QueueClosed)
    }
}

/// A live agent instance owned by exactly one session.
pub struct AgentHandle {
    pub requests: LiveRequestQueue,
    pub events: AgentEventStream,
}

/// Starts live agents.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// A short identifier for logs and the health probe (e.g. `"gemini"`).
    fn name(&self) -> &'static str;

    /// Instantiates a live agent for one session.
    async fn start(&self, ctx: &SessionContext) -> Result<AgentHandle, AgentError>;
}
