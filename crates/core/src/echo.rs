//! A local agent runtime that answers every input with itself.
//!
//! Useful for exercising the session plumbing without a model behind it: each
//! text turn comes back as one partial text fragment followed by a turn-complete
//! event, and each audio chunk comes back unchanged.

use crate::agent::{
    AgentError, AgentEvent, AgentHandle, AgentRuntime, LiveRequest, LiveRequestQueue,
};
use crate::session::SessionContext;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct EchoRuntime;

impl EchoRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentRuntime for EchoRuntime {
    fn name(&self) -> &'static str {
        "echo"
    }

    async fn start(&self, ctx: &SessionContext) -> Result<AgentHandle, AgentError> {
        let (requests, mut request_rx) = LiveRequestQueue::new();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let session_id = ctx.session_id;

        tokio::spawn(async move {
            while let Some(request) = request_rx.recv().await {
                let events = match request {
                    LiveRequest::Text(text) => {
                        vec![AgentEvent::partial_text(text), AgentEvent::turn_complete()]
                    }
                    LiveRequest::Audio(chunk) => vec![AgentEvent::audio("audio/pcm", chunk)],
                    LiveRequest::Close => break,
                };
                for event in events {
                    if event_tx.send(event).await.is_err() {
                        debug!(%session_id, "Echo event receiver dropped.");
                        return;
                    }
                }
            }
            info!(%session_id, "Echo runtime finished.");
        });

        Ok(AgentHandle {
            requests,
            events: Box::pin(ReceiverStream::new(event_rx).map(Ok::<_, AgentError>)),
        })
    }
}
