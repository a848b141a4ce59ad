//! Session discovery registry.
//!
//! Students find a coach's session here before joining. Entries live in a
//! pluggable [`KeyValueStore`]: [`InMemoryStore`] for tests and single
//! instances, [`RedisStore`] when instances share a registry.
//!
//! Status updates are monotonic (`waiting -> active -> ended`). Entries
//! older than the maximum age are evicted by the registry cleanup task
//! regardless of status.

pub mod store;

pub use store::{InMemoryStore, KeyValueStore, RedisStore};

use crate::errors::CcError;
use crate::types::{SessionId, SessionMetadata, SessionStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Key prefix for session metadata.
pub const SESSION_KEY_PREFIX: &str = "class:session:";

/// Key prefix for user bindings.
pub const USER_KEY_PREFIX: &str = "class:user:";

/// Prefix no entry uses; listing it checks the store is reachable.
const PROBE_KEY_PREFIX: &str = "class:probe:";

fn session_key(session_id: &SessionId) -> String {
    format!("{SESSION_KEY_PREFIX}{session_id}")
}

fn user_key(user_id: &str) -> String {
    format!("{USER_KEY_PREFIX}{user_id}")
}

/// Registry of class sessions and user bindings.
#[derive(Clone)]
pub struct SessionDiscoveryService {
    store: Arc<dyn KeyValueStore>,
}

impl SessionDiscoveryService {
    /// Registry over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Registry over a fresh in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }

    /// Insert or overwrite a session entry.
    #[instrument(skip_all, fields(session_id = %metadata.id))]
    pub async fn register(&self, metadata: &SessionMetadata) -> Result<(), CcError> {
        self.save(metadata).await?;
        debug!(
            target: "cc.discovery",
            session_id = %metadata.id,
            status = %metadata.status,
            "Session registered"
        );
        Ok(())
    }

    /// Remove a session entry and every user binding that points at it.
    #[instrument(skip_all, fields(session_id = %session_id))]
    pub async fn unregister(&self, session_id: &SessionId) -> Result<(), CcError> {
        self.store.delete(&session_key(session_id)).await?;

        for key in self.store.list_keys(USER_KEY_PREFIX).await? {
            if self.store.get(&key).await?.as_deref() == Some(session_id.as_str()) {
                self.store.delete(&key).await?;
            }
        }

        debug!(target: "cc.discovery", session_id = %session_id, "Session unregistered");
        Ok(())
    }

    /// Look up by session id.
    pub async fn get_by_id(&self, session_id: &SessionId) -> Result<Option<SessionMetadata>, CcError> {
        let Some(raw) = self.store.get(&session_key(session_id)).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CcError::Store(format!("corrupt session entry {session_id}: {e}")))
    }

    /// Look up by topic (normalized the same way coaches and students do).
    pub async fn get_by_topic(&self, topic: &str) -> Result<Option<SessionMetadata>, CcError> {
        let session_id = SessionId::from_topic(topic)?;
        self.get_by_id(&session_id).await
    }

    /// Sessions students can still join, oldest first.
    ///
    /// Ended sessions are excluded; private sessions only when asked for.
    /// Unreadable entries are skipped.
    pub async fn get_available(&self, include_private: bool) -> Result<Vec<SessionMetadata>, CcError> {
        let mut sessions = Vec::new();

        for key in self.store.list_keys(SESSION_KEY_PREFIX).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<SessionMetadata>(&raw) {
                Ok(metadata) => {
                    if metadata.status != SessionStatus::Ended
                        && (include_private || !metadata.is_private)
                    {
                        sessions.push(metadata);
                    }
                }
                Err(e) => {
                    warn!(target: "cc.discovery", key = %key, error = %e, "Skipping unreadable session entry");
                }
            }
        }

        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    /// Move a session forward in its lifecycle.
    ///
    /// # Errors
    ///
    /// `SessionNotFound` for unknown sessions, `InvalidStatusTransition`
    /// when the change would move backwards.
    pub async fn update_status(
        &self,
        session_id: &SessionId,
        status: SessionStatus,
    ) -> Result<SessionMetadata, CcError> {
        let mut metadata = self.require(session_id).await?;

        if !metadata.status.can_transition_to(status) {
            return Err(CcError::InvalidStatusTransition {
                from: metadata.status,
                to: status,
            });
        }
        if metadata.status == status {
            return Ok(metadata);
        }

        metadata.status = status;
        if status == SessionStatus::Ended {
            metadata.ended_at = Some(Utc::now());
        }
        self.save(&metadata).await?;
        Ok(metadata)
    }

    /// Record the current participant count.
    pub async fn update_participant_count(
        &self,
        session_id: &SessionId,
        participant_count: u32,
    ) -> Result<SessionMetadata, CcError> {
        let mut metadata = self.require(session_id).await?;
        if metadata.participant_count != participant_count {
            metadata.participant_count = participant_count;
            self.save(&metadata).await?;
        }
        Ok(metadata)
    }

    /// Remember which session a user is in.
    pub async fn bind_user(&self, user_id: &str, session_id: &SessionId) -> Result<(), CcError> {
        self.store.set(&user_key(user_id), session_id.as_str()).await
    }

    /// Session a user is bound to, if any.
    pub async fn session_for_user(&self, user_id: &str) -> Result<Option<SessionId>, CcError> {
        match self.store.get(&user_key(user_id)).await? {
            Some(raw) => SessionId::from_topic(&raw)
                .map(Some)
                .map_err(|e| CcError::Store(format!("corrupt user binding: {e}"))),
            None => Ok(None),
        }
    }

    /// Forget a user binding.
    pub async fn unbind_user(&self, user_id: &str) -> Result<(), CcError> {
        self.store.delete(&user_key(user_id)).await
    }

    /// Evict every session older than `max_age` along with its user bindings.
    ///
    /// Returns the number of sessions evicted. A failure on one entry is
    /// logged and the sweep continues.
    #[instrument(skip_all, fields(max_age_secs = max_age.as_secs()))]
    pub async fn cleanup_expired(&self, max_age: Duration) -> Result<usize, CcError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| CcError::Config(format!("invalid registry max age: {e}")))?;
        let cutoff = Utc::now() - max_age;
        let mut evicted = 0;

        for key in self.store.list_keys(SESSION_KEY_PREFIX).await? {
            let Some(raw) = self.store.get(&key).await? else {
                continue;
            };
            let Ok(metadata) = serde_json::from_str::<SessionMetadata>(&raw) else {
                warn!(target: "cc.discovery", key = %key, "Evicting unreadable session entry");
                self.store.delete(&key).await?;
                evicted += 1;
                continue;
            };
            if metadata.created_at >= cutoff {
                continue;
            }

            match self.unregister(&metadata.id).await {
                Ok(()) => evicted += 1,
                Err(e) => {
                    warn!(
                        target: "cc.discovery",
                        session_id = %metadata.id,
                        error = %e,
                        "Failed to evict expired session"
                    );
                }
            }
        }

        if evicted > 0 {
            info!(target: "cc.discovery", evicted, "Expired sessions evicted");
        }
        Ok(evicted)
    }

    async fn require(&self, session_id: &SessionId) -> Result<SessionMetadata, CcError> {
        self.get_by_id(session_id)
            .await?
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))
    }

    /// Round-trip to the store without touching any entry.
    pub async fn probe(&self) -> Result<(), CcError> {
        self.store.list_keys(PROBE_KEY_PREFIX).await.map(|_| ())
    }

    async fn save(&self, metadata: &SessionMetadata) -> Result<(), CcError> {
        let raw = serde_json::to_string(metadata)
            .map_err(|e| CcError::Internal(format!("failed to serialize session: {e}")))?;
        self.store.set(&session_key(&metadata.id), &raw).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn metadata(topic: &str) -> SessionMetadata {
        SessionMetadata::new(SessionId::from_topic(topic).unwrap(), topic, "coach", 10)
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let discovery = SessionDiscoveryService::in_memory();
        let entry = metadata("Yoga 101");
        discovery.register(&entry).await.unwrap();

        let by_id = discovery.get_by_id(&entry.id).await.unwrap().unwrap();
        assert_eq!(by_id, entry);

        let by_topic = discovery.get_by_topic("  yoga   101 ").await.unwrap().unwrap();
        assert_eq!(by_topic.id, entry.id);

        assert!(discovery.get_by_topic("pilates").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_available_excludes_ended_and_private() {
        let discovery = SessionDiscoveryService::in_memory();

        let mut first = metadata("first");
        first.created_at = Utc::now() - chrono::Duration::minutes(5);
        let second = metadata("second");
        let mut hidden = metadata("hidden");
        hidden.is_private = true;
        let ended = metadata("ended");

        for entry in [&second, &first, &hidden, &ended] {
            discovery.register(entry).await.unwrap();
        }
        discovery
            .update_status(&ended.id, SessionStatus::Ended)
            .await
            .unwrap();

        let public = discovery.get_available(false).await.unwrap();
        let ids: Vec<&str> = public.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);

        let all = discovery.get_available(true).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_status_updates_are_monotonic() {
        let discovery = SessionDiscoveryService::in_memory();
        let entry = metadata("hiit");
        discovery.register(&entry).await.unwrap();

        let active = discovery
            .update_status(&entry.id, SessionStatus::Active)
            .await
            .unwrap();
        assert_eq!(active.status, SessionStatus::Active);

        let ended = discovery
            .update_status(&entry.id, SessionStatus::Ended)
            .await
            .unwrap();
        assert!(ended.ended_at.is_some());

        let err = discovery
            .update_status(&entry.id, SessionStatus::Active)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CcError::InvalidStatusTransition {
                from: SessionStatus::Ended,
                to: SessionStatus::Active
            }
        ));
    }

    #[tokio::test]
    async fn test_update_unknown_session() {
        let discovery = SessionDiscoveryService::in_memory();
        let id = SessionId::from_topic("ghost").unwrap();
        assert!(matches!(
            discovery.update_participant_count(&id, 3).await,
            Err(CcError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_user_bindings() {
        let discovery = SessionDiscoveryService::in_memory();
        let entry = metadata("spin");
        discovery.register(&entry).await.unwrap();

        discovery.bind_user("alice", &entry.id).await.unwrap();
        discovery.bind_user("bob", &entry.id).await.unwrap();
        assert_eq!(
            discovery.session_for_user("alice").await.unwrap(),
            Some(entry.id.clone())
        );

        discovery.unbind_user("alice").await.unwrap();
        assert!(discovery.session_for_user("alice").await.unwrap().is_none());

        discovery.unregister(&entry.id).await.unwrap();
        assert!(discovery.session_for_user("bob").await.unwrap().is_none());
        assert!(discovery.get_by_id(&entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired_evicts_old_sessions_regardless_of_status() {
        let discovery = SessionDiscoveryService::in_memory();

        let mut stale = metadata("stale");
        stale.created_at = Utc::now() - chrono::Duration::hours(3);
        stale.status = SessionStatus::Active;
        let fresh = metadata("fresh");

        discovery.register(&stale).await.unwrap();
        discovery.register(&fresh).await.unwrap();
        discovery.bind_user("carol", &stale.id).await.unwrap();

        let evicted = discovery
            .cleanup_expired(Duration::from_secs(2 * 60 * 60))
            .await
            .unwrap();
        assert_eq!(evicted, 1);
        assert!(discovery.get_by_id(&stale.id).await.unwrap().is_none());
        assert!(discovery.get_by_id(&fresh.id).await.unwrap().is_some());
        assert!(discovery.session_for_user("carol").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_probe_reaches_store() {
        let discovery = SessionDiscoveryService::in_memory();
        discovery.probe().await.unwrap();
    }
}
