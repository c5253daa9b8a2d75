//! Defines the WebSocket message protocol between the client and the session.
//!
//! Content frames are JSON objects `{"contentType": ..., "data": ...}` where audio
//! data is base64-encoded PCM. Control frames carry `turnComplete`/`interrupted`
//! flags and no data. The keepalive is a bare `ping` text frame and is not JSON.

use super::error::SessionError;
use base64::Engine;
use bytes::Bytes;
use std::borrow::Cow;
use serde::{Deserialize, Serialize};

pub const TEXT_PLAIN: &str = "text/plain";
pub const AUDIO_PCM: &str = "audio/pcm";
pub const KEEPALIVE_FRAME: &str = "ping";

/// One structured unit of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Text(String),
    Audio(Bytes),
    /// Agent → client only.
    Control { turn_complete: bool, interrupted: bool },
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(alias = "mime_type")]
    content_type: Option<String>,
    data: Option<String>,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug)]
#[serde(untagged)]
enum ServerMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Content { content_type: &'static str, data: Cow<'a, str> },
    #[serde(rename_all = "camelCase")]
    Control { turn_complete: bool, interrupted: bool },
    /// Reports the fatal error that ended the session.
    Error { error: ErrorBody<'a> },
}

#[derive(Serialize, Debug)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

/// Whether `mime_type` denotes raw PCM audio, ignoring parameters such as `;rate=`.
pub fn is_audio_pcm(mime_type: &str) -> bool {
    base_type(mime_type) == AUDIO_PCM
}

fn base_type(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decodes a client text frame into an envelope.
///
/// Frames that are not JSON objects, lack a `contentType`, or carry an undecodable
/// payload are `MalformedEnvelope`; a well-formed frame with any content type other
/// than text or audio is `UnsupportedContentType`.
pub fn decode(frame: &str) -> Result<Envelope, SessionError> {
    let wire: WireEnvelope = serde_json::from_str(frame)
        .map_err(|e| SessionError::MalformedEnvelope(format!("invalid JSON envelope: {}", e)))?;
    let content_type = wire
        .content_type
        .ok_or_else(|| SessionError::MalformedEnvelope("missing contentType".to_string()))?;

    match base_type(&content_type).as_str() {
        TEXT_PLAIN => Ok(Envelope::Text(require_data(wire.data)?)),
        AUDIO_PCM => {
            let encoded = require_data(wire.data)?;
            let samples = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    SessionError::MalformedEnvelope(format!("audio data is not base64: {}", e))
                })?;
            Ok(Envelope::Audio(samples.into()))
        }
        _ => Err(SessionError::UnsupportedContentType(content_type)),
    }
}

fn require_data(data: Option<String>) -> Result<String, SessionError> {
    data.ok_or_else(|| SessionError::MalformedEnvelope("missing data".to_string()))
}

/// Encodes an envelope into a text frame.
pub fn encode(envelope: &Envelope) -> Result<String, SessionError> {
    let message = match envelope {
        Envelope::Text(text) => ServerMessage::Content {
            content_type: TEXT_PLAIN,
            data: Cow::Borrowed(text.as_str()),
        },
        Envelope::Audio(samples) => ServerMessage::Content {
            content_type: AUDIO_PCM,
            data: Cow::Owned(base64::engine::general_purpose::STANDARD.encode(samples)),
        },
        Envelope::Control {
            turn_complete,
            interrupted,
        } => ServerMessage::Control {
            turn_complete: *turn_complete,
            interrupted: *interrupted,
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// Encodes the frame sent to the client when a session ends on a fatal error.
pub fn encode_error(code: &str, message: &str) -> Result<String, SessionError> {
    let message = ServerMessage::Error {
        error: ErrorBody { code, message },
    };
    Ok(serde_json::to_string(&message)?)
}
