//! First-completion racing of a session's activities.
//!
//! All activities share one cancellation token. The first to finish decides how
//! the session ends; the rest are cancelled and drained within a grace period,
//! after which anything still running is aborted.

use super::error::{Activity, ActivityResult, SessionError};
use std::{collections::HashMap, future::Future, time::Duration};
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error};

/// The outcome of an activity that was still running when the session began draining.
pub type Drained = Vec<(Activity, ActivityResult)>;

#[derive(Default)]
pub struct Activities {
    set: JoinSet<ActivityResult>,
    names: HashMap<task::Id, Activity>,
}

impl Activities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F>(&mut self, activity: Activity, fut: F)
    where
        F: Future<Output = ActivityResult> + Send + 'static,
    {
        let handle = self.set.spawn(fut);
        self.names.insert(handle.id(), activity);
    }

    /// Waits for the first activity to finish and returns which one it was.
    ///
    /// A panicking activity counts as finishing with `SessionError::Panicked`.
    pub async fn first(&mut self) -> (Option<Activity>, ActivityResult) {
        match self.set.join_next_with_id().await {
            Some(joined) => self.resolve(joined),
            None => (
                None,
                Err(SessionError::Panicked("no activities were started".to_string())),
            ),
        }
    }

    /// Collects the remaining activities, which are expected to observe a
    /// cancellation already signalled by the caller.
    ///
    /// Activities still running after `grace` are aborted and logged.
    pub async fn drain(&mut self, grace: Duration) -> Drained {
        let mut drained = Vec::new();
        let finished = tokio::time::timeout(grace, async {
            while let Some(joined) = self.set.join_next_with_id().await {
                let (activity, result) = self.resolve(joined);
                if let Some(activity) = activity {
                    debug!(%activity, outcome = ?result, "Activity drained.");
                    drained.push((activity, result));
                }
            }
        })
        .await;

        if finished.is_err() {
            let overdue: Vec<String> = self.names.values().map(ToString::to_string).collect();
            error!(
                ?overdue,
                grace_ms = grace.as_millis() as u64,
                "Activities ignored cancellation. Aborting."
            );
            self.set.abort_all();
            while self.set.join_next().await.is_some() {}
            self.names.clear();
        }
        drained
    }

    fn resolve(
        &mut self,
        joined: Result<(task::Id, ActivityResult), JoinError>,
    ) -> (Option<Activity>, ActivityResult) {
        match joined {
            Ok((id, result)) => (self.names.remove(&id), result),
            Err(e) => {
                let activity = self.names.remove(&e.id());
                error!(?activity, error = %e, "Session activity did not complete.");
                (activity, Err(SessionError::Panicked(e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::error::StopReason;
    use tokio_util::sync::CancellationToken;

    fn cooperative(
        cancel: CancellationToken,
        finish_after: Option<Duration>,
        reason: StopReason,
    ) -> impl Future<Output = ActivityResult> + Send + 'static {
        async move {
            match finish_after {
                Some(delay) => tokio::select! {
                    () = cancel.cancelled() => Ok(StopReason::Cancelled),
                    () = tokio::time::sleep(delay) => Ok(reason),
                },
                None => {
                    cancel.cancelled().await;
                    Ok(StopReason::Cancelled)
                }
            }
        }
    }

    async fn relay_bug() -> ActivityResult {
        panic!("relay bug")
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_completion_wins_and_others_are_cancelled() {
        let cancel = CancellationToken::new();
        let mut activities = Activities::new();
        activities.spawn(
            Activity::Outbound,
            cooperative(cancel.clone(), None, StopReason::AgentExhausted),
        );
        activities.spawn(
            Activity::Inbound,
            cooperative(
                cancel.clone(),
                Some(Duration::from_secs(1)),
                StopReason::ClientDisconnected,
            ),
        );
        activities.spawn(
            Activity::Keepalive,
            cooperative(cancel.clone(), None, StopReason::KeepaliveStopped),
        );

        let (trigger, outcome) = activities.first().await;
        assert_eq!(trigger, Some(Activity::Inbound));
        assert_eq!(outcome.unwrap(), StopReason::ClientDisconnected);

        cancel.cancel();
        let drained = activities.drain(Duration::from_secs(5)).await;
        let mut names: Vec<_> = drained.iter().map(|(a, _)| *a).collect();
        names.sort_by_key(ToString::to_string);
        assert_eq!(names, vec![Activity::Keepalive, Activity::Outbound]);
        assert!(
            drained
                .iter()
                .all(|(_, r)| matches!(r, Ok(StopReason::Cancelled)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_reported_as_trigger_outcome() {
        let cancel = CancellationToken::new();
        let mut activities = Activities::new();
        activities.spawn(Activity::Inbound, async {
            Err::<StopReason, _>(SessionError::UnsupportedContentType("video/mp4".into()))
        });
        activities.spawn(
            Activity::Keepalive,
            cooperative(cancel.clone(), None, StopReason::KeepaliveStopped),
        );

        let (trigger, outcome) = activities.first().await;
        assert_eq!(trigger, Some(Activity::Inbound));
        assert!(matches!(outcome, Err(SessionError::UnsupportedContentType(_))));

        cancel.cancel();
        let drained = activities.drain(Duration::from_secs(5)).await;
        assert_eq!(drained.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_activity_is_named() {
        let mut activities = Activities::new();
        activities.spawn(Activity::Outbound, relay_bug());

        let (trigger, outcome) = activities.first().await;
        assert_eq!(trigger, Some(Activity::Outbound));
        assert!(matches!(outcome, Err(SessionError::Panicked(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_activities_that_ignore_cancellation() {
        let cancel = CancellationToken::new();
        let mut activities = Activities::new();
        activities.spawn(Activity::Inbound, async {
            Ok::<_, SessionError>(StopReason::ClientDisconnected)
        });
        activities.spawn(Activity::Keepalive, async {
            std::future::pending::<()>().await;
            Ok::<_, SessionError>(StopReason::Cancelled)
        });

        activities.first().await;
        cancel.cancel();

        let started = tokio::time::Instant::now();
        let drained = activities.drain(Duration::from_secs(5)).await;
        assert!(drained.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(activities.names.is_empty());
    }
}
