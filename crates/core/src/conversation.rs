//! Conversation Log
//!
//! An ordered, append-only record of the turns exchanged during one session,
//! plus the persistence contract the log is flushed to when the session closes.

use crate::session::Modality;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Agent => write!(f, "agent"),
        }
    }
}

/// The content of a turn, tagged with the content type of the envelope it came from.
///
/// Audio is relayed, not retained: an audio turn records how many bytes of PCM
/// went by, so a long spoken session keeps a log the size of its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "contentType", content = "data")]
pub enum TurnPayload {
    #[serde(rename = "text/plain")]
    Text(String),
    #[serde(rename = "audio/pcm")]
    Audio { bytes: u64 },
}

impl TurnPayload {
    /// An audio payload describing `samples`.
    pub fn audio(samples: &[u8]) -> Self {
        TurnPayload::Audio {
            bytes: samples.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub sequence: u64,
    pub payload: TurnPayload,
}

impl Turn {
    /// The text of this turn, if it is a text turn.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            TurnPayload::Text(text) => Some(text),
            TurnPayload::Audio { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct LogInner {
    turns: Vec<Turn>,
    next_sequence: u64,
    flushed: bool,
}

/// The in-memory log for one session.
///
/// Both relays append concurrently, so every access goes through a mutex. Appends
/// never block on I/O.
#[derive(Debug, Default)]
pub struct ConversationLog {
    inner: Mutex<LogInner>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn and returns the sequence number it was recorded under.
    ///
    /// Audio following an audio turn of the same role is folded into that turn,
    /// so an uninterrupted run of audio chunks occupies a single sequence number.
    /// Appends after the log has been flushed are dropped and return `None`.
    pub fn append(&self, role: Role, payload: TurnPayload) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.flushed {
            return None;
        }

        if let TurnPayload::Audio { bytes: chunk } = &payload {
            if let Some(Turn {
                role: last_role,
                sequence,
                payload: TurnPayload::Audio { bytes },
            }) = inner.turns.last_mut()
            {
                if *last_role == role {
                    *bytes += chunk;
                    return Some(*sequence);
                }
            }
        }

        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.turns.push(Turn {
            role,
            sequence,
            payload,
        });
        Some(sequence)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the turns recorded so far.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.inner.lock().turns.clone()
    }

    /// Hands the recorded turns over for persistence. Only the first call returns
    /// `Some`; the log is sealed afterwards.
    pub fn take_for_flush(&self) -> Option<Vec<Turn>> {
        let mut inner = self.inner.lock();
        if inner.flushed {
            return None;
        }
        inner.flushed = true;
        Some(std::mem::take(&mut inner.turns))
    }
}

/// One persisted conversation: every turn of a closed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: Uuid,
    pub user_id: String,
    pub modality: Modality,
    pub closed_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

/// The persistence sink conversation logs are flushed to.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Appends a finished conversation.
    async fn append(&self, record: ConversationRecord) -> Result<()>;

    /// Returns up to `limit` conversations for a user, newest first.
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationRecord>>;
}

/// A `ConversationStore` that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    records: Mutex<Vec<ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ConversationRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(&self, record: ConversationRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<ConversationRecord>> {
        let records = self.records.lock();
        Ok(records
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}
