//! Process-wide view of the sessions that are currently open.

use chrono::{DateTime, Utc};
use fieldvoice_core::Modality;
use parking_lot::Mutex;
use std::{collections::HashMap, sync::Arc};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub modality: Modality,
    pub started_at: DateTime<Utc>,
}

/// Sessions register on start and are removed when their `Registration` drops,
/// so a session that panics or is aborted still leaves the registry.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, ActiveSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        self: &Arc<Self>,
        session_id: Uuid,
        user_id: &str,
        modality: Modality,
    ) -> Registration {
        let mut sessions = self.sessions.lock();
        sessions.insert(
            session_id,
            ActiveSession {
                session_id,
                user_id: user_id.to_string(),
                modality,
                started_at: Utc::now(),
            },
        );
        let open_for_user = sessions.values().filter(|s| s.user_id == user_id).count();
        debug!(%session_id, user_id, open_for_user, total = sessions.len(), "Session registered.");
        drop(sessions);

        Registration {
            registry: Arc::clone(self),
            session_id,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

/// Removes its session from the registry when dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<SessionRegistry>,
    session_id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self.registry.sessions.lock().remove(&self.session_id);
        if let Some(session) = removed {
            debug!(
                session_id = %session.session_id,
                user_id = %session.user_id,
                modality = %session.modality,
                open_secs = (Utc::now() - session.started_at).num_seconds(),
                "Session deregistered."
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_lives_as_long_as_its_guard() {
        let registry = Arc::new(SessionRegistry::new());
        let first = registry.register(Uuid::new_v4(), "farmer-1", Modality::Text);
        let second = registry.register(Uuid::new_v4(), "farmer-1", Modality::Audio);
        let _other = registry.register(Uuid::new_v4(), "farmer-2", Modality::Text);
        assert_eq!(registry.active_count(), 3);

        drop(first);
        assert_eq!(registry.active_count(), 2);
        drop(second);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn test_registration_is_removed_when_its_task_is_aborted() {
        let registry = Arc::new(SessionRegistry::new());
        let (registered_tx, registered_rx) = tokio::sync::oneshot::channel();

        let task = tokio::spawn({
            let registry = registry.clone();
            async move {
                let _registration = registry.register(Uuid::new_v4(), "farmer-1", Modality::Text);
                let _ = registered_tx.send(());
                std::future::pending::<()>().await;
            }
        });
        registered_rx.await.unwrap();
        assert_eq!(registry.active_count(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(registry.active_count(), 0);
    }
}
