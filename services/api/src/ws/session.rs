//! Manages the WebSocket connection lifecycle for one client session.
//!
//! A session gathers caller context, starts an agent, then runs the outbound
//! relay, inbound relay and keepalive side by side until the first of them
//! stops. Whatever ended it, the log is flushed once and the transport closed.

use super::{
    bridge,
    coordinator::{Activities, Drained},
    error::{Activity, ActivityResult, SessionError},
    keepalive, protocol,
};
use crate::state::AppState;
use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use fieldvoice_core::{
    AgentHandle, ConversationLog, ConversationRecord, ConversationStore, Lifecycle,
    LiveRequestQueue, Modality, SessionContext, SessionState,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// How long cancelled activities get to wind down before they are aborted.
pub const DRAIN_GRACE: Duration = Duration::from_secs(5);
/// How long the final error frame and close handshake may take on a client that
/// has stopped reading.
pub const RELEASE_TIMEOUT: Duration = Duration::from_secs(5);
const PROFILE_TIMEOUT: Duration = Duration::from_secs(5);
const HISTORY_LIMIT: usize = 5;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// `"true"` requests spoken responses. Any other value means text.
    #[serde(default)]
    pub is_audio: Option<String>,
}

impl ConnectParams {
    fn modality(&self) -> Modality {
        Modality::from_audio_flag(
            self.is_audio
                .as_deref()
                .is_some_and(|v| v.eq_ignore_ascii_case("true")),
        )
    }
}

/// Axum handler to upgrade an HTTP connection to a WebSocket session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if user_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "user_id must not be empty").into_response();
    }
    let modality = params.modality();
    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        run_session(state, user_id, modality, sink, stream).await;
    })
}

/// Writes one text frame, holding the sink lock for the whole send so frames
/// from different writers never interleave.
pub(crate) async fn send_frame<S>(sink: &Mutex<S>, frame: String) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    sink.lock().await.send(Message::Text(frame.into())).await
}

/// One client session: its identity, lifecycle, log and the write side of the agent.
pub struct Session {
    pub id: Uuid,
    pub user_id: String,
    pub modality: Modality,
    lifecycle: Lifecycle,
    requests: Option<LiveRequestQueue>,
    log: Arc<ConversationLog>,
}

impl Session {
    pub fn new(ctx: &SessionContext, requests: LiveRequestQueue) -> Self {
        Self {
            id: ctx.session_id,
            user_id: ctx.user_id.clone(),
            modality: ctx.modality,
            lifecycle: Lifecycle::new(),
            requests: Some(requests),
            log: Arc::new(ConversationLog::new()),
        }
    }

    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    pub fn log(&self) -> &Arc<ConversationLog> {
        &self.log
    }

    /// Releases the agent, flushes the log and marks the session closed.
    ///
    /// Safe to call more than once; only the first call does anything. Returns
    /// whether this call persisted the log.
    pub async fn close(&mut self, store: &dyn ConversationStore) -> bool {
        if self.lifecycle.is_closed() {
            return false;
        }
        if self.lifecycle.state() == SessionState::Active {
            self.lifecycle.advance(SessionState::Draining);
        }

        if let Some(requests) = self.requests.take() {
            requests.close();
        }

        let mut persisted = false;
        if let Some(turns) = self.log.take_for_flush() {
            let turn_count = turns.len();
            let record = ConversationRecord {
                session_id: self.id,
                user_id: self.user_id.clone(),
                modality: self.modality,
                closed_at: Utc::now(),
                turns,
            };
            match store.append(record).await {
                Ok(()) => {
                    info!(turn_count, "Conversation log persisted.");
                    persisted = true;
                }
                Err(e) => error!(error = ?e, turn_count, "Failed to persist conversation log."),
            }
        }

        self.lifecycle.advance(SessionState::Closed);
        persisted
    }
}

/// How a session ended.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub state: SessionState,
    /// The activity whose completion ended the session, if it got that far.
    pub trigger: Option<Activity>,
    pub outcome: ActivityResult,
    pub drained: Drained,
    pub persisted: bool,
}

/// Runs a session over an already-split transport until it is closed.
#[instrument(name = "ws_session", skip_all, fields(session_id, user_id = %user_id))]
pub async fn run_session<S, R, E>(
    state: Arc<AppState>,
    user_id: String,
    modality: Modality,
    sink: S,
    stream: R,
) -> SessionReport
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let mut ctx = SessionContext::new(user_id, modality);
    tracing::Span::current().record("session_id", tracing::field::display(ctx.session_id));
    info!(%modality, "New WebSocket session. Gathering context...");

    gather_context(&state, &mut ctx).await;
    let sink = Arc::new(Mutex::new(sink));

    let AgentHandle { requests, events } = match state.runtime.start(&ctx).await {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, runtime = state.runtime.name(), "Failed to start agent runtime.");
            let mut lifecycle = Lifecycle::new();
            lifecycle.advance(SessionState::Closed);
            let farewell = error_frame("agent_unavailable", &e.to_string());
            release_transport(&sink, farewell).await;
            return SessionReport {
                session_id: ctx.session_id,
                state: lifecycle.state(),
                trigger: None,
                outcome: Err(SessionError::from(e)),
                drained: Vec::new(),
                persisted: false,
            };
        }
    };

    let registration = state.sessions.register(ctx.session_id, &ctx.user_id, modality);
    let mut session = Session::new(&ctx, requests.clone());
    let cancel = CancellationToken::new();

    let mut activities = Activities::new();
    activities.spawn(
        Activity::Outbound,
        bridge::run_outbound(events, sink.clone(), session.log().clone(), cancel.clone()),
    );
    activities.spawn(
        Activity::Inbound,
        bridge::run_inbound(stream, requests, session.log().clone(), cancel.clone()),
    );
    activities.spawn(
        Activity::Keepalive,
        keepalive::run_keepalive(sink.clone(), state.config.keepalive_interval, cancel.clone()),
    );
    session.lifecycle.advance(SessionState::Active);
    info!(runtime = state.runtime.name(), "Session active.");

    let (trigger, outcome) = activities.first().await;
    session.lifecycle.advance(SessionState::Draining);
    cancel.cancel();
    let drained = activities.drain(DRAIN_GRACE).await;

    let farewell = match &outcome {
        Ok(reason) => {
            info!(?trigger, ?reason, "Session ended.");
            None
        }
        Err(e) => {
            error!(?trigger, error = %e, "Session ended on fatal error.");
            error_frame(e.code(), &e.to_string())
        }
    };

    // The log is flushed before anything else touches the client, which may
    // have stopped reading.
    let persisted = session.close(&*state.store).await;
    drop(registration);
    release_transport(&sink, farewell).await;
    info!("Session closed.");

    SessionReport {
        session_id: session.id,
        state: session.state(),
        trigger,
        outcome,
        drained,
        persisted,
    }
}

/// Seeds the context with the caller's profile and recent history. Neither is
/// required for the session to start.
pub(crate) async fn gather_context(state: &AppState, ctx: &mut SessionContext) {
    if let Some(profiles) = &state.profiles {
        match tokio::time::timeout(PROFILE_TIMEOUT, profiles.fetch_profile(&ctx.user_id)).await {
            Ok(Ok(profile)) => ctx.profile = profile,
            Ok(Err(e)) => warn!(error = ?e, "Profile lookup failed. Continuing without profile."),
            Err(_) => warn!("Profile lookup timed out. Continuing without profile."),
        }
    }

    match state.store.recent(&ctx.user_id, HISTORY_LIMIT).await {
        Ok(history) => ctx.history = history,
        Err(e) => warn!(error = ?e, "Failed to load conversation history."),
    }
}

fn error_frame(code: &str, message: &str) -> Option<String> {
    protocol::encode_error(code, message)
        .inspect_err(|e| warn!(error = %e, "Failed to encode error frame."))
        .ok()
}

/// Sends the optional farewell frame and closes the transport, giving up after
/// `RELEASE_TIMEOUT`.
async fn release_transport<S>(sink: &Mutex<S>, farewell: Option<String>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let release = async {
        let mut sink = sink.lock().await;
        if let Some(frame) = farewell {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                warn!(error = %e, "Failed to send error frame to client.");
            }
        }
        if let Err(e) = sink.close().await {
            info!(error = %e, "Transport was already closed.");
        }
    };
    if tokio::time::timeout(RELEASE_TIMEOUT, release).await.is_err() {
        warn!(
            timeout_ms = RELEASE_TIMEOUT.as_millis() as u64,
            "Client is not reading. Abandoning transport."
        );
    }
}
