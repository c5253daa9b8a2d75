//! API Models
//!
//! This module defines the response bodies served by the REST endpoints and
//! documented with `utoipa`.

use chrono::{DateTime, Utc};
use fieldvoice_core::{ConversationRecord, Turn, TurnPayload};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    #[schema(example = "gemini")]
    pub agent_provider: String,
    pub active_sessions: usize,
    pub uptime_secs: u64,
    pub timestamp: DateTime<Utc>,
}

/// One turn of a stored conversation. Audio turns report their size instead of
/// their samples.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct TurnView {
    #[schema(example = "user")]
    pub role: String,
    pub sequence: u64,
    #[schema(example = "text/plain")]
    pub content_type: String,
    #[schema(example = "When should I plant beans?")]
    pub text: Option<String>,
    pub audio_bytes: Option<u64>,
}

impl From<&Turn> for TurnView {
    fn from(turn: &Turn) -> Self {
        let (content_type, text, audio_bytes) = match &turn.payload {
            TurnPayload::Text(text) => ("text/plain", Some(text.clone()), None),
            TurnPayload::Audio { bytes } => ("audio/pcm", None, Some(*bytes)),
        };
        Self {
            role: turn.role.to_string(),
            sequence: turn.sequence,
            content_type: content_type.to_string(),
            text,
            audio_bytes,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone)]
pub struct ConversationView {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    pub user_id: String,
    #[schema(example = "text")]
    pub modality: String,
    pub closed_at: DateTime<Utc>,
    pub turns: Vec<TurnView>,
}

impl From<ConversationRecord> for ConversationView {
    fn from(record: ConversationRecord) -> Self {
        Self {
            session_id: record.session_id,
            user_id: record.user_id,
            modality: record.modality.to_string(),
            closed_at: record.closed_at,
            turns: record.turns.iter().map(TurnView::from).collect(),
        }
    }
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ConversationQuery {
    /// Maximum number of conversations to return (default 5, at most 50).
    pub limit: Option<usize>,
}

/// A single-shot text message for the agent.
#[derive(Deserialize, ToSchema, Debug)]
pub struct ChatRequest {
    #[schema(example = "farmer-7")]
    pub user_id: String,
    #[schema(example = "When should I plant beans?")]
    pub message: String,
}

/// The agent's complete reply to a `ChatRequest`.
#[derive(Serialize, Deserialize, ToSchema, Debug)]
pub struct ChatResponse {
    #[schema(value_type = String, format = Uuid)]
    pub session_id: Uuid,
    #[schema(example = "Plant after the first steady rains.")]
    pub response: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldvoice_core::{Modality, Role};

    #[test]
    fn test_conversation_view_from_record() {
        let record = ConversationRecord {
            session_id: Uuid::new_v4(),
            user_id: "farmer-9".to_string(),
            modality: Modality::Audio,
            closed_at: Utc::now(),
            turns: vec![
                Turn {
                    role: Role::User,
                    sequence: 0,
                    payload: TurnPayload::Audio { bytes: 320 },
                },
                Turn {
                    role: Role::Agent,
                    sequence: 1,
                    payload: TurnPayload::Text("Expect rain on Thursday.".to_string()),
                },
            ],
        };

        let view = ConversationView::from(record);
        assert_eq!(view.modality, "audio");
        assert_eq!(
            view.turns[0],
            TurnView {
                role: "user".to_string(),
                sequence: 0,
                content_type: "audio/pcm".to_string(),
                text: None,
                audio_bytes: Some(320),
            }
        );
        assert_eq!(view.turns[1].role, "agent");
        assert_eq!(view.turns[1].text.as_deref(), Some("Expect rain on Thursday."));
    }

    #[test]
    fn test_health_response_serialization() {
        let health = HealthResponse {
            status: "ok".to_string(),
            agent_provider: "echo".to_string(),
            active_sessions: 2,
            uptime_secs: 61,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["agent_provider"], "echo");
        assert_eq!(json["active_sessions"], 2);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_conversation_query_limit_is_optional() {
        let query: ConversationQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, None);
    }
}
