//! `SessionCoordinatorActor` - role-based join/create protocol.
//!
//! One coordinator per runtime owns every session's lifecycle:
//!
//! ```text
//! waiting --(first coach join)--> active --(last participant leaves | end)--> ended
//! ```
//!
//! `ended` is terminal; the entry is evicted after a grace delay so
//! in-flight events can settle. Evictions run on child cancellation
//! tokens, cancelled when a coach re-creates the session or the
//! coordinator shuts down.
//!
//! Session identity is the normalized topic, so a coach and a student
//! typing the same class name meet without a rendezvous step. Seats are
//! keyed by member id, never by display name. Every
//! lifecycle change is mirrored into the discovery registry; mirror
//! failures are logged and never fail the caller.
//!
//! Sessions older than the maximum age are dropped outright when the
//! cleanup task asks, whatever their status.

use crate::discovery::SessionDiscoveryService;
use crate::errors::CcError;
use crate::observability::metrics as prom;
use crate::types::{Member, ParticipantRole, SessionId, SessionMetadata, SessionStatus};

use super::messages::{CoordinatorMessage, CoordinatorStatus, JoinEligibility};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 1000;

/// Default capacity per session.
pub const DEFAULT_MAX_PARTICIPANTS: u32 = 100;

/// Default grace delay between `ended` and eviction.
pub const DEFAULT_EVICTION_DELAY: Duration = Duration::from_secs(5);

/// Coordinator tuning.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Capacity for newly created sessions.
    pub max_participants: u32,
    /// Grace delay before an ended session is evicted.
    pub eviction_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            eviction_delay: DEFAULT_EVICTION_DELAY,
        }
    }
}

/// Handle to the `SessionCoordinatorActor`.
#[derive(Clone, Debug)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl SessionCoordinatorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> CoordinatorMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a `waiting` session for a coach without joining it.
    ///
    /// Returns the existing entry if a live session already uses the topic.
    pub async fn create_session(
        &self,
        topic: &str,
        coach_id: &str,
    ) -> Result<SessionMetadata, CcError> {
        let (topic, coach_id) = (topic.to_string(), coach_id.to_string());
        self.request(|respond_to| CoordinatorMessage::CreateSession {
            topic,
            coach_id,
            respond_to,
        })
        .await?
    }

    /// Join by topic: a coach creates-or-joins, a student joins an active session.
    pub async fn get_or_create_session(
        &self,
        topic: &str,
        member: impl Into<Member>,
        role: ParticipantRole,
    ) -> Result<SessionMetadata, CcError> {
        let (topic, member) = (topic.to_string(), member.into());
        self.request(|respond_to| CoordinatorMessage::GetOrCreateSession {
            topic,
            member,
            role,
            respond_to,
        })
        .await?
    }

    /// Add a participant by session id.
    pub async fn add_participant(
        &self,
        session_id: &str,
        member: impl Into<Member>,
        role: ParticipantRole,
    ) -> Result<SessionMetadata, CcError> {
        let (session_id, member) = (session_id.to_string(), member.into());
        self.request(|respond_to| CoordinatorMessage::AddParticipant {
            session_id,
            member,
            role,
            respond_to,
        })
        .await?
    }

    /// Remove a participant by member id; the last one out ends the session.
    pub async fn remove_participant(
        &self,
        session_id: &str,
        member_id: &str,
    ) -> Result<SessionMetadata, CcError> {
        let (session_id, member_id) = (session_id.to_string(), member_id.to_string());
        self.request(|respond_to| CoordinatorMessage::RemoveParticipant {
            session_id,
            member_id,
            respond_to,
        })
        .await?
    }

    /// Drop every session created at least `max_age` ago.
    ///
    /// Returns the number of sessions dropped.
    pub async fn expire_sessions(&self, max_age: Duration) -> Result<usize, CcError> {
        self.request(|respond_to| CoordinatorMessage::ExpireSessions {
            max_age,
            respond_to,
        })
        .await?
    }

    /// End a session explicitly.
    pub async fn end_session(&self, session_id: &str) -> Result<SessionMetadata, CcError> {
        let session_id = session_id.to_string();
        self.request(|respond_to| CoordinatorMessage::EndSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Whether `role` could join `session_id` right now. No side effects.
    pub async fn can_user_join_session(
        &self,
        session_id: &str,
        role: ParticipantRole,
    ) -> Result<JoinEligibility, CcError> {
        let session_id = session_id.to_string();
        self.request(|respond_to| CoordinatorMessage::CanUserJoin {
            session_id,
            role,
            respond_to,
        })
        .await?
    }

    /// Look up a session.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionMetadata, CcError> {
        let session_id = session_id.to_string();
        self.request(|respond_to| CoordinatorMessage::GetSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Coordinator status.
    pub async fn status(&self) -> Result<CoordinatorStatus, CcError> {
        self.request(|respond_to| CoordinatorMessage::GetStatus { respond_to })
            .await
    }

    /// Cancel the actor (pending evictions are cancelled with it).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    metadata: SessionMetadata,
    /// Roles by member id.
    members: HashMap<String, ParticipantRole>,
    /// Distinguishes a re-created session from the one it replaced.
    generation: u64,
    /// Pending eviction, once ended.
    eviction: Option<CancellationToken>,
}

/// The `SessionCoordinatorActor` implementation.
pub struct SessionCoordinatorActor {
    instance_id: String,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// For eviction timers; weak so the mailbox closes when handles drop.
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    discovery: SessionDiscoveryService,
    config: CoordinatorConfig,
    sessions: HashMap<SessionId, ManagedSession>,
    next_generation: u64,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionCoordinatorActor {
    /// Spawn the coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        instance_id: String,
        discovery: SessionDiscoveryService,
        config: CoordinatorConfig,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Coordinator, &instance_id),
            instance_id,
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            discovery,
            config,
            sessions: HashMap::new(),
            next_generation: 0,
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        (
            SessionCoordinatorHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "cc.actor.coordinator", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.coordinator",
            instance_id = %self.instance_id,
            max_participants = self.config.max_participants,
            "SessionCoordinatorActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.coordinator",
                        instance_id = %self.instance_id,
                        "SessionCoordinatorActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "cc.actor.coordinator",
                                instance_id = %self.instance_id,
                                "SessionCoordinatorActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "cc.actor.coordinator",
            instance_id = %self.instance_id,
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionCoordinatorActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: CoordinatorMessage) {
        match message {
            CoordinatorMessage::CreateSession {
                topic,
                coach_id,
                respond_to,
            } => {
                let result = self.create_session(&topic, &coach_id).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetOrCreateSession {
                topic,
                member,
                role,
                respond_to,
            } => {
                let result = match SessionId::from_topic(&topic) {
                    Ok(session_id) => self.join(session_id, &topic, member, role).await,
                    Err(e) => Err(e),
                };
                record_join(role, &result);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::AddParticipant {
                session_id,
                member,
                role,
                respond_to,
            } => {
                let result = match SessionId::from_topic(&session_id) {
                    Ok(id) => self.join(id, &session_id, member, role).await,
                    Err(e) => Err(e),
                };
                record_join(role, &result);
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::RemoveParticipant {
                session_id,
                member_id,
                respond_to,
            } => {
                let result = match SessionId::from_topic(&session_id) {
                    Ok(id) => self.remove_participant(&id, &member_id).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::EndSession {
                session_id,
                respond_to,
            } => {
                let result = match SessionId::from_topic(&session_id) {
                    Ok(id) => self.end_session(&id).await,
                    Err(e) => Err(e),
                };
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::CanUserJoin {
                session_id,
                role,
                respond_to,
            } => {
                let result =
                    SessionId::from_topic(&session_id).map(|id| self.eligibility(&id, role));
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = SessionId::from_topic(&session_id).and_then(|id| {
                    self.sessions
                        .get(&id)
                        .map(|s| s.metadata.clone())
                        .ok_or(CcError::SessionNotFound(id.to_string()))
                });
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::ExpireSessions {
                max_age,
                respond_to,
            } => {
                let result = self.expire_sessions(max_age).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            CoordinatorMessage::EvictSession {
                session_id,
                generation,
            } => {
                self.evict(&session_id, generation).await;
            }
        }
    }

    async fn create_session(
        &mut self,
        topic: &str,
        coach_id: &str,
    ) -> Result<SessionMetadata, CcError> {
        let session_id = SessionId::from_topic(topic)?;
        match self.sessions.get(&session_id) {
            Some(existing) if existing.metadata.status != SessionStatus::Ended => {
                Ok(existing.metadata.clone())
            }
            _ => Ok(self.insert_new_session(session_id, topic, coach_id).await),
        }
    }

    /// Core join protocol shared by `get_or_create_session` and `add_participant`.
    async fn join(
        &mut self,
        session_id: SessionId,
        topic: &str,
        member: Member,
        role: ParticipantRole,
    ) -> Result<SessionMetadata, CcError> {
        let live = self
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.metadata.status != SessionStatus::Ended);

        if !live {
            if role != ParticipantRole::Coach {
                return Err(CcError::SessionNotFound(session_id.to_string()));
            }
            self.insert_new_session(session_id.clone(), topic, &member.display_name)
                .await;
        }

        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| CcError::Internal("session vanished during join".to_string()))?;

        if session.metadata.status == SessionStatus::Waiting && role == ParticipantRole::Student {
            return Err(CcError::SessionNotReady(session_id.to_string()));
        }
        if session.members.contains_key(&member.id) {
            return Ok(session.metadata.clone());
        }
        if session.metadata.is_full() {
            return Err(CcError::CapacityExceeded {
                session_id: session_id.to_string(),
                max_participants: session.metadata.max_participants,
            });
        }

        session.members.insert(member.id.clone(), role);
        session.metadata.participant_count = member_count(&session.members);
        let activated =
            role == ParticipantRole::Coach && session.metadata.status == SessionStatus::Waiting;
        if activated {
            session.metadata.status = SessionStatus::Active;
        }
        let snapshot = session.metadata.clone();

        info!(
            target: "cc.actor.coordinator",
            session_id = %session_id,
            role = role.as_str(),
            participant_count = snapshot.participant_count,
            status = %snapshot.status,
            "Participant joined session"
        );

        self.sync_registry(&snapshot, activated).await;
        self.mirror(
            "bind_user",
            &session_id,
            self.discovery.bind_user(&member.id, &session_id),
        )
        .await;
        self.update_gauges();

        Ok(snapshot)
    }

    async fn remove_participant(
        &mut self,
        session_id: &SessionId,
        member_id: &str,
    ) -> Result<SessionMetadata, CcError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        if session.members.remove(member_id).is_none() {
            return Err(CcError::ParticipantNotFound(member_id.to_string()));
        }
        session.metadata.participant_count = member_count(&session.members);
        let snapshot = session.metadata.clone();

        self.mirror("unbind_user", session_id, self.discovery.unbind_user(member_id))
            .await;

        if snapshot.participant_count == 0 {
            debug!(
                target: "cc.actor.coordinator",
                session_id = %session_id,
                "Last participant left, ending session"
            );
            return self.end_session(session_id).await;
        }

        self.sync_registry(&snapshot, false).await;
        self.update_gauges();
        Ok(snapshot)
    }

    async fn end_session(&mut self, session_id: &SessionId) -> Result<SessionMetadata, CcError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| CcError::SessionNotFound(session_id.to_string()))?;

        if session.metadata.status == SessionStatus::Ended {
            return Ok(session.metadata.clone());
        }

        let departing: Vec<String> = session.members.drain().map(|(id, _)| id).collect();
        session.metadata.status = SessionStatus::Ended;
        session.metadata.ended_at = Some(Utc::now());
        session.metadata.participant_count = 0;
        let snapshot = session.metadata.clone();

        for member_id in &departing {
            self.mirror("unbind_user", session_id, self.discovery.unbind_user(member_id))
                .await;
        }
        self.schedule_eviction(session_id);
        self.sync_registry(&snapshot, true).await;
        self.update_gauges();

        info!(
            target: "cc.actor.coordinator",
            session_id = %session_id,
            eviction_delay_ms = self.config.eviction_delay.as_millis() as u64,
            "Session ended"
        );

        Ok(snapshot)
    }

    /// Drop sessions at least `max_age` old, whatever their status, along
    /// with their registry entries and user bindings.
    async fn expire_sessions(&mut self, max_age: Duration) -> Result<usize, CcError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| CcError::Config(format!("invalid session max age: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.metadata.created_at <= cutoff)
            .map(|(id, _)| id.clone())
            .collect();

        for session_id in &expired {
            let Some(session) = self.sessions.remove(session_id) else {
                continue;
            };
            if let Some(eviction) = session.eviction {
                eviction.cancel();
            }
            for member_id in session.members.keys() {
                self.mirror("unbind_user", session_id, self.discovery.unbind_user(member_id))
                    .await;
            }
            self.mirror("unregister", session_id, self.discovery.unregister(session_id))
                .await;

            info!(
                target: "cc.actor.coordinator",
                session_id = %session_id,
                status = %session.metadata.status,
                participants = session.members.len(),
                "Expired session dropped"
            );
        }

        if !expired.is_empty() {
            self.update_gauges();
        }
        Ok(expired.len())
    }

    fn eligibility(&self, session_id: &SessionId, role: ParticipantRole) -> JoinEligibility {
        match self.sessions.get(session_id) {
            Some(session) if session.metadata.status != SessionStatus::Ended => {
                if session.metadata.status == SessionStatus::Waiting
                    && role == ParticipantRole::Student
                {
                    JoinEligibility::SessionNotReady
                } else if session.metadata.is_full() {
                    JoinEligibility::SessionFull
                } else {
                    JoinEligibility::Eligible
                }
            }
            _ if role == ParticipantRole::Coach => JoinEligibility::CreatesSession,
            _ => JoinEligibility::SessionNotFound,
        }
    }

    fn status(&self) -> CoordinatorStatus {
        let mut status = CoordinatorStatus::default();
        for session in self.sessions.values() {
            match session.metadata.status {
                SessionStatus::Waiting => status.sessions_waiting += 1,
                SessionStatus::Active => status.sessions_active += 1,
                SessionStatus::Ended => status.sessions_ended += 1,
            }
            status.total_participants += session.members.len();
            if session.eviction.is_some() {
                status.pending_evictions += 1;
            }
        }
        status
    }

    /// Insert a fresh `waiting` session, replacing (and un-scheduling) any
    /// ended entry with the same id.
    async fn insert_new_session(
        &mut self,
        session_id: SessionId,
        topic: &str,
        coach_id: &str,
    ) -> SessionMetadata {
        if let Some(previous) = self.sessions.remove(&session_id) {
            if let Some(eviction) = previous.eviction {
                eviction.cancel();
            }
            debug!(
                target: "cc.actor.coordinator",
                session_id = %session_id,
                "Replacing ended session"
            );
        }

        self.next_generation += 1;
        let metadata = SessionMetadata::new(
            session_id.clone(),
            topic.trim(),
            coach_id,
            self.config.max_participants,
        );
        self.sessions.insert(
            session_id.clone(),
            ManagedSession {
                metadata: metadata.clone(),
                members: HashMap::new(),
                generation: self.next_generation,
                eviction: None,
            },
        );

        info!(
            target: "cc.actor.coordinator",
            session_id = %session_id,
            max_participants = metadata.max_participants,
            "Session created"
        );

        self.mirror("register", &session_id, self.discovery.register(&metadata))
            .await;
        self.update_gauges();
        metadata
    }

    fn schedule_eviction(&mut self, session_id: &SessionId) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };

        let token = self.cancel_token.child_token();
        session.eviction = Some(token.clone());

        let sender = self.self_sender.clone();
        let delay = self.config.eviction_delay;
        let generation = session.generation;
        let session_id = session_id.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(sender) = sender.upgrade() {
                        let _ = sender
                            .send(CoordinatorMessage::EvictSession { session_id, generation })
                            .await;
                    }
                }
            }
        });
    }

    async fn evict(&mut self, session_id: &SessionId, generation: u64) {
        let current = self.sessions.get(session_id).is_some_and(|s| {
            s.generation == generation && s.metadata.status == SessionStatus::Ended
        });
        if !current {
            debug!(
                target: "cc.actor.coordinator",
                session_id = %session_id,
                generation,
                "Stale eviction ignored"
            );
            return;
        }

        self.sessions.remove(session_id);
        self.mirror("unregister", session_id, self.discovery.unregister(session_id))
            .await;
        self.update_gauges();

        info!(
            target: "cc.actor.coordinator",
            session_id = %session_id,
            "Session evicted"
        );
    }

    /// Push status and count into the registry, re-registering the full
    /// entry if the registry lost it.
    async fn sync_registry(&self, snapshot: &SessionMetadata, status_changed: bool) {
        let mut result = Ok(());
        if status_changed {
            result = self
                .discovery
                .update_status(&snapshot.id, snapshot.status)
                .await
                .map(|_| ());
        }
        if result.is_ok() {
            result = self
                .discovery
                .update_participant_count(&snapshot.id, snapshot.participant_count)
                .await
                .map(|_| ());
        }

        match result {
            Err(CcError::SessionNotFound(_)) => {
                self.mirror("register", &snapshot.id, self.discovery.register(snapshot))
                    .await;
            }
            other => {
                self.mirror("update", &snapshot.id, async move { other }).await;
            }
        }
    }

    /// Await a registry write, logging instead of propagating failures.
    async fn mirror<T>(
        &self,
        operation: &'static str,
        session_id: &SessionId,
        write: impl Future<Output = Result<T, CcError>>,
    ) {
        if let Err(e) = write.await {
            warn!(
                target: "cc.actor.coordinator",
                session_id = %session_id,
                operation,
                error = %e,
                "Registry mirror failed"
            );
            prom::record_error(operation, e.metric_label(), e.error_code());
        }
    }

    fn update_gauges(&self) {
        let status = self.status();
        prom::set_sessions_active("waiting", status.sessions_waiting);
        prom::set_sessions_active("active", status.sessions_active);
        prom::set_sessions_active("ended", status.sessions_ended);
    }
}

fn member_count(members: &HashMap<String, ParticipantRole>) -> u32 {
    u32::try_from(members.len()).unwrap_or(u32::MAX)
}

fn record_join(role: ParticipantRole, result: &Result<SessionMetadata, CcError>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.metric_label(),
    };
    prom::record_join_outcome(role.as_str(), outcome);
}
