//! Relays between the client transport and the live agent.
//!
//! The outbound relay turns agent events into envelopes for the client; the
//! inbound relay turns client envelopes into agent requests. Each relay waits on
//! exactly one thing (the next agent event or the next client frame) and checks
//! the session's cancellation token while it waits.

use super::{
    error::{ActivityResult, SessionError, StopReason},
    protocol::{self, Envelope},
    session::send_frame,
};
use axum::extract::ws::Message;
use fieldvoice_core::{
    AgentEvent, AgentEventStream, ConversationLog, Fragment, LiveRequestQueue, Role, TurnPayload,
};
use futures_util::{Sink, Stream, StreamExt};
use std::{fmt::Display, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chooses the envelope an agent event should be relayed as, if any.
///
/// Turn boundaries win over content. Otherwise only the leading fragment is
/// considered: PCM audio becomes an audio envelope and a partial text chunk a text
/// envelope. Anything else is dropped.
pub fn envelope_for_event(event: &AgentEvent) -> Option<Envelope> {
    if event.turn_complete || event.interrupted {
        return Some(Envelope::Control {
            turn_complete: event.turn_complete,
            interrupted: event.interrupted,
        });
    }
    match event.leading_fragment()? {
        Fragment::Inline { mime_type, data }
            if protocol::is_audio_pcm(mime_type) && !data.is_empty() =>
        {
            Some(Envelope::Audio(data.clone()))
        }
        Fragment::Text {
            text,
            partial: true,
        } if !text.is_empty() => Some(Envelope::Text(text.clone())),
        _ => None,
    }
}

/// Forwards agent events to the client until the agent stream ends, the client
/// can no longer be written to, or the session is cancelled.
pub async fn run_outbound<S>(
    mut events: AgentEventStream,
    sink: Arc<Mutex<S>>,
    log: Arc<ConversationLog>,
    cancel: CancellationToken,
) -> ActivityResult
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    loop {
        let event = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StopReason::Cancelled),
            next = events.next() => match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    info!("Agent event stream ended.");
                    return Ok(StopReason::AgentExhausted);
                }
            },
        };

        let Some(envelope) = envelope_for_event(&event) else {
            debug!(?event, "Skipping agent event with no relayable content.");
            continue;
        };

        // Recorded before sending so the log does not depend on client health.
        match &envelope {
            Envelope::Text(text) => {
                log.append(Role::Agent, TurnPayload::Text(text.clone()));
            }
            Envelope::Audio(samples) => {
                log.append(Role::Agent, TurnPayload::audio(samples));
            }
            Envelope::Control { .. } => {}
        }

        let frame = protocol::encode(&envelope)?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StopReason::Cancelled),
            sent = send_frame(&sink, frame) => {
                if let Err(e) = sent {
                    info!(error = %e, "Failed to send to client. Treating as disconnect.");
                    return Ok(StopReason::ClientDisconnected);
                }
            }
        }
    }
}

/// Forwards client envelopes to the agent until the client disconnects, a frame
/// cannot be handled, or the session is cancelled.
pub async fn run_inbound<R, E>(
    mut stream: R,
    requests: LiveRequestQueue,
    log: Arc<ConversationLog>,
    cancel: CancellationToken,
) -> ActivityResult
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StopReason::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                let envelope = protocol::decode(text.as_str())?;
                forward(envelope, &requests, &log)?;
            }
            Some(Ok(Message::Binary(_))) => {
                return Err(SessionError::MalformedEnvelope(
                    "binary frames are not part of the protocol".to_string(),
                ));
            }
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "Client sent close frame.");
                return Ok(StopReason::ClientDisconnected);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Err(e)) => {
                warn!(error = %e, "Error receiving from client WebSocket.");
                return Ok(StopReason::ClientDisconnected);
            }
            None => {
                info!("Client stream ended.");
                return Ok(StopReason::ClientDisconnected);
            }
        }
    }
}

fn forward(
    envelope: Envelope,
    requests: &LiveRequestQueue,
    log: &ConversationLog,
) -> Result<(), SessionError> {
    match envelope {
        Envelope::Text(text) => {
            log.append(Role::User, TurnPayload::Text(text.clone()));
            requests.send_text(text)?;
            debug!("Forwarded text turn to agent.");
        }
        Envelope::Audio(samples) => {
            log.append(Role::User, TurnPayload::audio(&samples));
            requests.send_audio_chunk(samples)?;
        }
        Envelope::Control { .. } => {
            return Err(SessionError::MalformedEnvelope(
                "control frames are only sent by the server".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use fieldvoice_core::{AgentError, LiveRequest};
    use futures::channel::mpsc;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type ClientFrames = mpsc::UnboundedSender<Result<Message, axum::Error>>;

    fn text(frame: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(frame.to_owned().into()))
    }

    fn frame_json(msg: Message) -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    fn inbound_fixture() -> (
        ClientFrames,
        mpsc::UnboundedReceiver<Result<Message, axum::Error>>,
        LiveRequestQueue,
        tokio::sync::mpsc::UnboundedReceiver<LiveRequest>,
        Arc<ConversationLog>,
    ) {
        let (client_tx, client_rx) = mpsc::unbounded();
        let (requests, request_rx) = LiveRequestQueue::new();
        (client_tx, client_rx, requests, request_rx, Arc::new(ConversationLog::new()))
    }

    #[test]
    fn test_envelope_for_control_events_ignores_content() {
        let mut event = AgentEvent::partial_text("ignored");
        event.turn_complete = true;
        assert_eq!(
            envelope_for_event(&event),
            Some(Envelope::Control {
                turn_complete: true,
                interrupted: false
            })
        );
        assert_eq!(
            envelope_for_event(&AgentEvent::interrupted()),
            Some(Envelope::Control {
                turn_complete: false,
                interrupted: true
            })
        );
    }

    #[test]
    fn test_envelope_for_content_events() {
        assert_eq!(
            envelope_for_event(&AgentEvent::partial_text("hi")),
            Some(Envelope::Text("hi".into()))
        );
        assert_eq!(
            envelope_for_event(&AgentEvent::audio("audio/pcm;rate=24000", vec![1u8, 2])),
            Some(Envelope::Audio(Bytes::from_static(&[1, 2])))
        );
    }

    #[test]
    fn test_envelope_for_skippable_events() {
        let final_text = AgentEvent {
            content: vec![Fragment::Text {
                text: "full turn".into(),
                partial: false,
            }],
            ..Default::default()
        };
        for event in [
            AgentEvent::default(),
            final_text,
            AgentEvent::partial_text(""),
            AgentEvent::audio("audio/pcm", Bytes::new()),
            AgentEvent::audio("image/png", vec![1u8]),
        ] {
            assert_eq!(envelope_for_event(&event), None, "{event:?}");
        }
    }

    #[test]
    fn test_only_leading_fragment_is_inspected() {
        let event = AgentEvent {
            content: vec![
                Fragment::Inline {
                    mime_type: "application/json".into(),
                    data: Bytes::from_static(b"{}"),
                },
                Fragment::Text {
                    text: "second".into(),
                    partial: true,
                },
            ],
            ..Default::default()
        };
        assert_eq!(envelope_for_event(&event), None);
    }

    #[tokio::test]
    async fn test_inbound_forwards_text_and_logs_user_turns_in_order() {
        let (client_tx, client_rx, requests, mut request_rx, log) = inbound_fixture();
        for n in ["one", "two", "three"] {
            client_tx
                .unbounded_send(text(&json!({"contentType": "text/plain", "data": n}).to_string()))
                .unwrap();
        }
        drop(client_tx);

        let result = run_inbound(client_rx, requests, log.clone(), CancellationToken::new()).await;
        assert_eq!(result.unwrap(), StopReason::ClientDisconnected);

        let turns = log.snapshot();
        let texts: Vec<_> = turns.iter().map(|t| t.text().unwrap()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
        assert!(turns.iter().all(|t| t.role == Role::User));
        assert_eq!(turns[2].sequence, 2);

        for n in ["one", "two", "three"] {
            assert_eq!(request_rx.recv().await, Some(LiveRequest::Text(n.into())));
        }
    }

    #[tokio::test]
    async fn test_inbound_decodes_audio_and_forwards_chunk() {
        let (client_tx, client_rx, requests, mut request_rx, log) = inbound_fixture();
        client_tx
            .unbounded_send(text(r#"{"contentType":"audio/pcm","data":"AAEC"}"#))
            .unwrap();
        client_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let result = run_inbound(client_rx, requests, log.clone(), CancellationToken::new()).await;
        assert_eq!(result.unwrap(), StopReason::ClientDisconnected);
        assert_eq!(
            request_rx.recv().await,
            Some(LiveRequest::Audio(Bytes::from_static(&[0, 1, 2])))
        );
        assert_eq!(log.snapshot()[0].payload, TurnPayload::Audio { bytes: 3 });
    }

    #[tokio::test]
    async fn test_inbound_unsupported_content_type_is_fatal() {
        let (client_tx, client_rx, requests, mut request_rx, log) = inbound_fixture();
        client_tx
            .unbounded_send(text(r#"{"contentType":"video/mp4","data":"..."}"#))
            .unwrap();
        client_tx
            .unbounded_send(text(r#"{"contentType":"text/plain","data":"never read"}"#))
            .unwrap();

        let result = run_inbound(client_rx, requests, log.clone(), CancellationToken::new()).await;
        assert!(matches!(result, Err(SessionError::UnsupportedContentType(_))));
        assert!(log.is_empty());
        assert!(request_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_binary_frame_is_malformed() {
        let (client_tx, client_rx, requests, _request_rx, log) = inbound_fixture();
        client_tx
            .unbounded_send(Ok(Message::Binary(Bytes::from_static(&[1, 2]))))
            .unwrap();

        let result = run_inbound(client_rx, requests, log, CancellationToken::new()).await;
        assert!(matches!(result, Err(SessionError::MalformedEnvelope(_))));
    }

    #[tokio::test]
    async fn test_inbound_receive_error_is_a_disconnect() {
        let (client_tx, client_rx, requests, _request_rx, log) = inbound_fixture();
        client_tx
            .unbounded_send(Err(axum::Error::new(std::io::Error::other("reset"))))
            .unwrap();

        let result = run_inbound(client_rx, requests, log, CancellationToken::new()).await;
        assert_eq!(result.unwrap(), StopReason::ClientDisconnected);
    }

    #[tokio::test]
    async fn test_inbound_closed_queue_is_fatal() {
        let (client_tx, client_rx, requests, request_rx, log) = inbound_fixture();
        drop(request_rx);
        client_tx
            .unbounded_send(text(r#"{"contentType":"text/plain","data":"hello"}"#))
            .unwrap();

        let result = run_inbound(client_rx, requests, log, CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(SessionError::Agent(AgentError::QueueClosed))
        ));
    }

    #[tokio::test]
    async fn test_inbound_observes_cancellation_while_waiting() {
        let (_client_tx, client_rx, requests, _request_rx, log) = inbound_fixture();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_inbound(client_rx, requests, log, cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("inbound relay should stop promptly")
            .unwrap();
        assert_eq!(result.unwrap(), StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_outbound_relays_and_logs_agent_content() {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let events: AgentEventStream = Box::pin(UnboundedReceiverStream::new(event_rx));
        let (out_tx, mut out_rx) = mpsc::unbounded::<Message>();
        let log = Arc::new(ConversationLog::new());

        event_tx.send(Ok(AgentEvent::partial_text("Sow after"))).unwrap();
        event_tx.send(Ok(AgentEvent::default())).unwrap();
        event_tx.send(Ok(AgentEvent::audio("audio/pcm", vec![7u8]))).unwrap();
        event_tx.send(Ok(AgentEvent::turn_complete())).unwrap();
        drop(event_tx);

        let result = run_outbound(
            events,
            Arc::new(Mutex::new(out_tx)),
            log.clone(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), StopReason::AgentExhausted);

        let frames: Vec<Value> = std::iter::from_fn(|| out_rx.try_next().ok().flatten())
            .map(frame_json)
            .collect();
        assert_eq!(
            frames,
            vec![
                json!({"contentType": "text/plain", "data": "Sow after"}),
                json!({"contentType": "audio/pcm", "data": "Bw=="}),
                json!({"turnComplete": true, "interrupted": false}),
            ]
        );

        let turns = log.snapshot();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, Role::Agent);
        assert_eq!(turns[0].text(), Some("Sow after"));
        assert_eq!(turns[1].payload, TurnPayload::Audio { bytes: 1 });
    }

    #[tokio::test]
    async fn test_outbound_logs_even_when_client_is_gone() {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded::<Message>();
        drop(out_rx);
        let log = Arc::new(ConversationLog::new());

        event_tx.send(Ok(AgentEvent::partial_text("unheard"))).unwrap();

        let result = run_outbound(
            Box::pin(UnboundedReceiverStream::new(event_rx)),
            Arc::new(Mutex::new(out_tx)),
            log.clone(),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result.unwrap(), StopReason::ClientDisconnected);
        assert_eq!(log.snapshot()[0].text(), Some("unheard"));
    }

    #[tokio::test]
    async fn test_outbound_agent_error_is_fatal() {
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        let (out_tx, _out_rx) = mpsc::unbounded::<Message>();
        event_tx
            .send(Err(AgentError::Stream("socket reset".into())))
            .unwrap();

        let result = run_outbound(
            Box::pin(UnboundedReceiverStream::new(event_rx)),
            Arc::new(Mutex::new(out_tx)),
            Arc::new(ConversationLog::new()),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Agent(AgentError::Stream(_)))));
    }

    #[tokio::test]
    async fn test_outbound_observes_cancellation_while_waiting() {
        let (_event_tx, event_rx) =
            tokio::sync::mpsc::unbounded_channel::<Result<AgentEvent, AgentError>>();
        let (out_tx, _out_rx) = mpsc::unbounded::<Message>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_outbound(
            Box::pin(UnboundedReceiverStream::new(event_rx)),
            Arc::new(Mutex::new(out_tx)),
            Arc::new(ConversationLog::new()),
            cancel,
        )
        .await;
        assert_eq!(result.unwrap(), StopReason::Cancelled);
    }
}
