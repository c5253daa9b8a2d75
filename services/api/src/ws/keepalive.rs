//! Keepalive pulse.
//!
//! Intermediaries such as load balancers drop WebSocket connections that look
//! idle. A bare `ping` text frame is written on a fixed interval for as long as
//! the session is active.

use super::{
    error::{ActivityResult, StopReason},
    protocol::KEEPALIVE_FRAME,
    session::send_frame,
};
use axum::extract::ws::Message;
use futures_util::Sink;
use std::{fmt::Display, sync::Arc, time::Duration};
use tokio::{
    sync::Mutex,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

/// Sends a keepalive frame every `interval`, starting one interval from now.
///
/// A failed send ends the pulse normally; it is the relays' job to notice a dead
/// connection.
pub async fn run_keepalive<S>(
    sink: Arc<Mutex<S>>,
    interval: Duration,
    cancel: CancellationToken,
) -> ActivityResult
where
    S: Sink<Message> + Unpin + Send,
    S::Error: Display,
{
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StopReason::Cancelled),
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(StopReason::Cancelled),
            sent = send_frame(&sink, KEEPALIVE_FRAME.to_string()) => {
                if let Err(e) = sent {
                    info!(error = %e, "Keepalive send failed. Stopping pulse.");
                    return Ok(StopReason::KeepaliveStopped);
                }
                trace!("Sent keepalive frame.");
            }
        }
    }
}
