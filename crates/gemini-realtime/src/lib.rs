//! Gemini Live agent runtime.
//!
//! Each session opens its own `BidiGenerateContent` WebSocket. After the setup
//! handshake a pump task forwards queued [`LiveRequest`]s to Gemini and turns
//! `serverContent` messages into [`AgentEvent`]s on a bounded channel, which the
//! session consumes as a stream.

pub mod types;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use fieldvoice_core::{
    AgentError, AgentEvent, AgentHandle, AgentRuntime, Fragment, LiveRequest, LiveRequestQueue,
    Modality, SessionContext,
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::mpsc::{self, UnboundedReceiver},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info, warn};

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";
/// Gemini Live expects 16 kHz mono PCM16 input.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

const EVENT_BUFFER: usize = 64;
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);

type GeminiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub endpoint: String,
}

impl GeminiConfig {
    pub fn new(api_key: String, model: String, system_prompt: String) -> Self {
        Self {
            api_key,
            model,
            system_prompt,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

/// An [`AgentRuntime`] backed by the Gemini Live API.
pub struct GeminiLiveRuntime {
    config: GeminiConfig,
}

impl GeminiLiveRuntime {
    pub fn new(config: GeminiConfig) -> Self {
        Self { config }
    }

    fn setup_message(&self, ctx: &SessionContext) -> types::ClientMessage {
        let mut instruction = self.config.system_prompt.clone();
        if let Some(block) = ctx.context_block() {
            instruction.push_str("\n\n");
            instruction.push_str(&block);
        }
        let modality = match ctx.modality {
            Modality::Text => types::ResponseModality::Text,
            Modality::Audio => types::ResponseModality::Audio,
        };
        types::ClientMessage::Setup(types::BidiGenerateContentSetup {
            model: self.config.model.clone(),
            generation_config: types::GenerationConfig {
                response_modalities: vec![modality],
            },
            system_instruction: (!instruction.trim().is_empty()).then(|| types::Content {
                role: None,
                parts: vec![types::Part { text: instruction }],
            }),
        })
    }

    async fn connect(&self, ctx: &SessionContext) -> Result<GeminiSocket> {
        let url = format!("{}?key={}", self.config.endpoint, self.config.api_key);
        let (mut socket, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        info!(session_id = %ctx.session_id, "Connected to Gemini Live WebSocket.");

        let setup = serde_json::to_string(&self.setup_message(ctx))?;
        socket.send(WsMessage::Text(setup.into())).await?;

        tokio::time::timeout(SETUP_TIMEOUT, await_setup_complete(&mut socket))
            .await
            .context("Timed out waiting for Gemini setup to complete")??;
        info!(session_id = %ctx.session_id, "Gemini session setup is complete.");
        Ok(socket)
    }
}

#[async_trait]
impl AgentRuntime for GeminiLiveRuntime {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn start(&self, ctx: &SessionContext) -> Result<AgentHandle, AgentError> {
        let socket = self
            .connect(ctx)
            .await
            .map_err(|e| AgentError::Start(format!("{:#}", e)))?;

        let (requests, request_rx) = LiveRequestQueue::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let session_id = ctx.session_id;

        tokio::spawn(async move {
            if let Err(e) = pump(socket, request_rx, &event_tx).await {
                error!(%session_id, error = ?e, "Gemini pump failed.");
                let _ = event_tx.send(Err(AgentError::Stream(e.to_string()))).await;
            }
            info!(%session_id, "Gemini pump finished.");
        });

        Ok(AgentHandle {
            requests,
            events: Box::pin(ReceiverStream::new(event_rx)),
        })
    }
}

async fn await_setup_complete(socket: &mut GeminiSocket) -> Result<()> {
    while let Some(msg) = socket.next().await {
        match msg? {
            WsMessage::Text(text) => {
                if parse_server_message(text.as_bytes())?.setup_complete.is_some() {
                    return Ok(());
                }
            }
            WsMessage::Binary(data) => {
                if parse_server_message(&data)?.setup_complete.is_some() {
                    return Ok(());
                }
            }
            WsMessage::Close(frame) => {
                return Err(anyhow!("Gemini closed the connection during setup: {:?}", frame));
            }
            _ => {}
        }
    }
    Err(anyhow!("Gemini connection ended during setup"))
}

/// Proxies requests to Gemini and server content back as events until either side
/// closes.
async fn pump(
    socket: GeminiSocket,
    mut request_rx: UnboundedReceiver<LiveRequest>,
    event_tx: &mpsc::Sender<Result<AgentEvent, AgentError>>,
) -> Result<()> {
    let (mut gemini_tx, mut gemini_rx) = socket.split();

    loop {
        tokio::select! {
            request = request_rx.recv() => {
                let payload = match request {
                    Some(LiveRequest::Text(text)) => text_turn(text),
                    Some(LiveRequest::Audio(chunk)) => audio_input(&chunk),
                    Some(LiveRequest::Close) | None => {
                        debug!("Request queue closed. Closing Gemini connection.");
                        let _ = gemini_tx.send(WsMessage::Close(None)).await;
                        return Ok(());
                    }
                };
                gemini_tx
                    .send(WsMessage::Text(serde_json::to_string(&payload)?.into()))
                    .await?;
            },
            msg = gemini_rx.next() => {
                let raw = match msg {
                    Some(Ok(WsMessage::Text(text))) => text.as_bytes().to_vec(),
                    Some(Ok(WsMessage::Binary(data))) => data.to_vec(),
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "Gemini WebSocket connection closed by server.");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                };
                let server_msg = match parse_server_message(&raw) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = ?e, "Skipping unparseable Gemini message.");
                        continue;
                    }
                };
                if server_msg.go_away.is_some() {
                    warn!("Gemini announced it will close the connection soon.");
                }
                if let Some(event) = translate(server_msg) {
                    if event_tx.send(Ok(event)).await.is_err() {
                        debug!("Event receiver dropped. Stopping Gemini pump.");
                        return Ok(());
                    }
                }
            },
        }
    }
}

fn parse_server_message(raw: &[u8]) -> Result<types::ServerMessage> {
    serde_json::from_slice(raw).context("Invalid Gemini server message")
}

fn text_turn(text: String) -> types::ClientMessage {
    types::ClientMessage::ClientContent(types::BidiGenerateContentClientContent {
        turns: vec![types::Content {
            role: Some("user".to_string()),
            parts: vec![types::Part { text }],
        }],
        turn_complete: true,
    })
}

fn audio_input(chunk: &[u8]) -> types::ClientMessage {
    types::ClientMessage::RealtimeInput(types::BidiGenerateContentRealtimeInput {
        audio: types::Blob {
            mime_type: INPUT_AUDIO_MIME.to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(chunk),
        },
    })
}

/// Maps one Gemini server message onto an agent event. Messages without server
/// content (setup acks, usage metadata, ...) produce nothing.
fn translate(msg: types::ServerMessage) -> Option<AgentEvent> {
    let content = msg.server_content?;
    let fragments = content
        .model_turn
        .map(|turn| turn.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|part| {
            if let Some(blob) = part.inline_data {
                match base64::engine::general_purpose::STANDARD.decode(&blob.data) {
                    Ok(data) => Some(Fragment::Inline {
                        mime_type: blob.mime_type,
                        data: data.into(),
                    }),
                    Err(e) => {
                        warn!(error = ?e, "Dropping inline data with invalid base64.");
                        None
                    }
                }
            } else {
                // Gemini streams text incrementally; every text part is a chunk.
                part.text.map(|text| Fragment::Text {
                    text,
                    partial: true,
                })
            }
        })
        .collect();

    Some(AgentEvent {
        turn_complete: content.turn_complete.unwrap_or(false),
        interrupted: content.interrupted.unwrap_or(false),
        content: fragments,
    })
}
