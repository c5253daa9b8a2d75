//! Axum Handlers for the REST API
//!
//! This module contains the logic for the health probe, single-shot chat and
//! conversation history endpoints. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use fieldvoice_core::{
    AgentError, AgentEventStream, AgentHandle, ConversationLog, ConversationRecord, Fragment,
    Modality, Role, SessionContext, TurnPayload,
};
use futures_util::StreamExt;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    models::{
        ChatRequest, ChatResponse, ConversationQuery, ConversationView, ErrorResponse,
        HealthResponse,
    },
    state::AppState,
    ws::session::gather_context,
};

pub const DEFAULT_CONVERSATION_LIMIT: usize = 5;
pub const MAX_CONVERSATION_LIMIT: usize = 50;
/// How long a chat request waits for the agent to finish its reply.
pub const CHAT_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

pub enum ApiError {
    BadRequest(String),
    /// The agent could not be reached or did not answer.
    Unavailable(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Unavailable(message) => {
                warn!(%message, "Agent unavailable.");
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Report service liveness and the number of open sessions.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        agent_provider: state.runtime.name().to_string(),
        active_sessions: state.sessions.active_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        timestamp: Utc::now(),
    })
}

/// List a user's most recent conversations, newest first.
#[utoipa::path(
    get,
    path = "/users/{user_id}/conversations",
    responses(
        (status = 200, description = "Recent conversations", body = [ConversationView]),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("user_id" = String, Path, description = "The ID of the user"),
        ConversationQuery
    )
)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<ConversationQuery>,
) -> Result<Json<Vec<ConversationView>>, ApiError> {
    let limit = match query.limit {
        None => DEFAULT_CONVERSATION_LIMIT,
        Some(0) => return Err(ApiError::BadRequest("limit must be at least 1".to_string())),
        Some(n) => n.min(MAX_CONVERSATION_LIMIT),
    };

    let records = state.store.recent(&user_id, limit).await?;
    Ok(Json(records.into_iter().map(ConversationView::from).collect()))
}

/// Send one text message to the agent and wait for its complete reply.
///
/// Each request runs a short-lived agent session seeded with the user's profile
/// and recent history. The exchange is stored like any other conversation.
#[utoipa::path(
    post,
    path = "/chat/send",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The agent's reply", body = ChatResponse),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 503, description = "Agent unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn send_chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".to_string()));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let mut ctx = SessionContext::new(request.user_id, Modality::Text);
    gather_context(&state, &mut ctx).await;

    let AgentHandle {
        requests,
        mut events,
    } = state
        .runtime
        .start(&ctx)
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let log = ConversationLog::new();
    log.append(Role::User, TurnPayload::Text(request.message.clone()));
    let reply = match requests.send_text(request.message) {
        Ok(()) => tokio::time::timeout(CHAT_REPLY_TIMEOUT, collect_reply(&mut events)).await,
        Err(e) => Ok(Err(e)),
    };
    requests.close();

    let reply = match reply {
        Ok(Ok(reply)) => reply,
        Ok(Err(e)) => return Err(ApiError::Unavailable(e.to_string())),
        Err(_) => {
            return Err(ApiError::Unavailable(
                "agent did not finish its reply in time".to_string(),
            ));
        }
    };
    if !reply.is_empty() {
        log.append(Role::Agent, TurnPayload::Text(reply.clone()));
    }

    if let Some(turns) = log.take_for_flush() {
        let record = ConversationRecord {
            session_id: ctx.session_id,
            user_id: ctx.user_id.clone(),
            modality: Modality::Text,
            closed_at: Utc::now(),
            turns,
        };
        match state.store.append(record).await {
            Ok(()) => info!(session_id = %ctx.session_id, "Chat exchange persisted."),
            Err(e) => error!(error = ?e, session_id = %ctx.session_id, "Failed to persist chat exchange."),
        }
    }

    Ok(Json(ChatResponse {
        session_id: ctx.session_id,
        response: reply,
    }))
}

/// Gathers the agent's reply up to the end of its turn. A final aggregated text,
/// when the runtime sends one, wins over the concatenated partial chunks.
async fn collect_reply(events: &mut AgentEventStream) -> Result<String, AgentError> {
    let mut partial = String::new();
    let mut full = None;
    while let Some(event) = events.next().await {
        let event = event?;
        for fragment in &event.content {
            if let Fragment::Text {
                text,
                partial: is_partial,
            } = fragment
            {
                if *is_partial {
                    partial.push_str(text);
                } else {
                    full = Some(text.clone());
                }
            }
        }
        if event.turn_complete || event.interrupted {
            break;
        }
    }
    Ok(full.unwrap_or(partial))
}
