//! `SessionActor` - one per joined class session.
//!
//! The actor owns the canonical participant map (through the reconciler)
//! and the pagination state, so both have exactly one writer. Its loop
//! interleaves three sources:
//!
//! - the vendor event stream from the SDK
//! - the reconciliation interval (roster query with a timeout)
//! - handle messages (queries, page controls)
//!
//! Each message, event or tick is handled to completion before the next.
//! A failed or timed-out roster query is logged and retried on the next
//! tick; nothing is rolled back.

use crate::errors::CcError;
use crate::events::{ClassEvent, EventBus, ParticipantEvent, ScalingEvent};
use crate::observability::metrics as prom;
use crate::pagination::{PageChange, PageState, VideoPaginationManager};
use crate::provider::{
    ProviderEvent, ProviderEventKind, RenderingStrategy, RosterEntry, SubscriptionQuality,
    VideoProviderSdk,
};
use crate::reconciler::ParticipantStateReconciler;
use crate::types::Participant;

use super::messages::SessionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Channel buffer for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Default reconciliation interval.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(3);

/// Default roster query timeout.
pub const DEFAULT_ROSTER_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Session actor tuning.
#[derive(Debug, Clone)]
pub struct SessionActorConfig {
    /// Period of the reconciliation backstop.
    pub reconcile_interval: Duration,
    /// Bound on each roster query.
    pub roster_query_timeout: Duration,
    /// Query the roster on `joined` events to seed media flags.
    pub sync_media_on_join: bool,
}

impl Default for SessionActorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            roster_query_timeout: DEFAULT_ROSTER_QUERY_TIMEOUT,
            sync_media_on_join: true,
        }
    }
}

/// Everything a session actor needs at spawn.
pub struct SessionActorParams {
    /// Topic-derived session id (for logs).
    pub session_id: String,
    /// The local participant, as returned by the provider join.
    pub local: Participant,
    pub sdk: Arc<dyn VideoProviderSdk>,
    /// Vendor event stream, if the SDK provided one.
    pub provider_events: Option<mpsc::Receiver<ProviderEvent>>,
    pub bus: EventBus,
    /// Tiles per page.
    pub page_size: usize,
    pub strategy: RenderingStrategy,
    pub config: SessionActorConfig,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
    session_id: String,
}

impl SessionActorHandle {
    /// Session id this actor serves.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, CcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| CcError::Internal(format!("response receive failed: {e}")))
    }

    /// Canonical participants in join order.
    pub async fn participants(&self) -> Result<Vec<Participant>, CcError> {
        self.request(|respond_to| SessionMessage::GetParticipants { respond_to })
            .await
    }

    /// Canonical participant count.
    pub async fn participant_count(&self) -> Result<usize, CcError> {
        self.request(|respond_to| SessionMessage::GetParticipantCount { respond_to })
            .await
    }

    /// Current page.
    pub async fn page(&self) -> Result<PageState, CcError> {
        self.request(|respond_to| SessionMessage::GetPage { respond_to })
            .await
    }

    /// Jump to a page (clamped).
    pub async fn set_page(&self, page: usize) -> Result<PageState, CcError> {
        self.request(|respond_to| SessionMessage::SetPage { page, respond_to })
            .await
    }

    /// Next page.
    pub async fn next_page(&self) -> Result<PageState, CcError> {
        self.request(|respond_to| SessionMessage::NextPage { respond_to })
            .await
    }

    /// Previous page.
    pub async fn previous_page(&self) -> Result<PageState, CcError> {
        self.request(|respond_to| SessionMessage::PreviousPage { respond_to })
            .await
    }

    /// Run a reconciliation pass now.
    pub async fn reconcile_now(&self) -> Result<usize, CcError> {
        self.request(|respond_to| SessionMessage::ReconcileNow { respond_to })
            .await?
    }

    /// Feed a vendor event.
    pub async fn apply_event(&self, event: ProviderEvent) -> Result<(), CcError> {
        self.sender
            .send(SessionMessage::ApplyEvent { event })
            .await
            .map_err(|e| CcError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: String,
    receiver: mpsc::Receiver<SessionMessage>,
    provider_events: Option<mpsc::Receiver<ProviderEvent>>,
    cancel_token: CancellationToken,
    sdk: Arc<dyn VideoProviderSdk>,
    reconciler: ParticipantStateReconciler,
    pagination: VideoPaginationManager,
    strategy: RenderingStrategy,
    bus: EventBus,
    config: SessionActorConfig,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    /// Spawn a session actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        params: SessionActorParams,
        cancel_token: CancellationToken,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let mut reconciler = ParticipantStateReconciler::new();
        reconciler.set_self(params.local);
        params.metrics.session_started();

        let actor = Self {
            session_id: params.session_id.clone(),
            receiver,
            provider_events: params.provider_events,
            cancel_token: cancel_token.clone(),
            sdk: params.sdk,
            reconciler,
            pagination: VideoPaginationManager::new(params.page_size),
            strategy: params.strategy,
            bus: params.bus,
            config: params.config,
            metrics: params.metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, &params.session_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            sender,
            cancel_token,
            session_id: params.session_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "cc.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            "SessionActor started"
        );

        // First tick fires immediately and seeds the map from the roster.
        let mut reconcile_tick = tokio::time::interval(self.config.reconcile_interval);
        reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "cc.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                _ = reconcile_tick.tick() => {
                    if let Err(e) = self.run_reconciliation().await {
                        warn!(
                            target: "cc.actor.session",
                            session_id = %self.session_id,
                            error = %e,
                            "Reconciliation skipped, retrying next tick"
                        );
                    }
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
                                target: "cc.actor.session",
                                session_id = %self.session_id,
                                "SessionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }

                event = next_provider_event(&mut self.provider_events) => {
                    match event {
                        Some(event) => {
                            self.mailbox.record_enqueue();
                            self.handle_provider_event(event).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            // Reconciliation keeps the map correct without events.
                            warn!(
                                target: "cc.actor.session",
                                session_id = %self.session_id,
                                "Provider event stream closed"
                            );
                            self.provider_events = None;
                        }
                    }
                }
            }
        }

        self.metrics.session_stopped();

        info!(
            target: "cc.actor.session",
            session_id = %self.session_id,
            participants = self.reconciler.count(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::ApplyEvent { event } => {
                self.handle_provider_event(event).await;
            }

            SessionMessage::ReconcileNow { respond_to } => {
                let result = self.run_reconciliation().await;
                let _ = respond_to.send(result);
            }

            SessionMessage::GetParticipants { respond_to } => {
                let _ = respond_to.send(self.reconciler.participants());
            }

            SessionMessage::GetParticipantCount { respond_to } => {
                let _ = respond_to.send(self.reconciler.count());
            }

            SessionMessage::GetPage { respond_to } => {
                let _ = respond_to.send(self.pagination.state());
            }

            SessionMessage::SetPage { page, respond_to } => {
                let change = self.pagination.set_page(page);
                self.apply_page_change(change).await;
                let _ = respond_to.send(self.pagination.state());
            }

            SessionMessage::NextPage { respond_to } => {
                let change = self.pagination.next_page();
                self.apply_page_change(change).await;
                let _ = respond_to.send(self.pagination.state());
            }

            SessionMessage::PreviousPage { respond_to } => {
                let change = self.pagination.previous_page();
                self.apply_page_change(change).await;
                let _ = respond_to.send(self.pagination.state());
            }
        }
    }

    async fn handle_provider_event(&mut self, event: ProviderEvent) {
        let Some(kind) = ProviderEventKind::from_vendor(&event.kind) else {
            prom::record_provider_event("unknown");
            debug!(
                target: "cc.actor.session",
                session_id = %self.session_id,
                vendor_kind = %event.kind,
                "Ignoring vendor event"
            );
            return;
        };
        prom::record_provider_event(kind.as_str());

        let roster = if kind == ProviderEventKind::Joined && self.config.sync_media_on_join {
            match self.query_roster().await {
                Ok(roster) => Some(roster),
                Err(e) => {
                    debug!(
                        target: "cc.actor.session",
                        session_id = %self.session_id,
                        error = %e,
                        "Media sync on join skipped"
                    );
                    None
                }
            }
        } else {
            None
        };

        let events = self
            .reconciler
            .apply_event(kind, &event.payload, roster.as_deref());
        self.publish(events).await;
    }

    /// One reconciliation pass. Returns the number of events emitted.
    async fn run_reconciliation(&mut self) -> Result<usize, CcError> {
        let started = Instant::now();
        let roster = match self.query_roster().await {
            Ok(roster) => roster,
            Err(e) => {
                prom::record_reconciliation("query_failed", 0, 0);
                return Err(e);
            }
        };
        prom::record_roster_query_latency(started.elapsed());

        let events = self.reconciler.reconcile(&roster);
        let recovered_joins = events
            .iter()
            .filter(|e| matches!(e, ClassEvent::Participant(ParticipantEvent::Joined { .. })))
            .count();
        let recovered_leaves = events
            .iter()
            .filter(|e| matches!(e, ClassEvent::Participant(ParticipantEvent::Left { .. })))
            .count();
        prom::record_reconciliation("success", recovered_joins, recovered_leaves);

        if !events.is_empty() {
            debug!(
                target: "cc.actor.session",
                session_id = %self.session_id,
                recovered_joins,
                recovered_leaves,
                corrections = events.len(),
                "Reconciliation corrected drift"
            );
        }

        let emitted = events.len();
        self.publish(events).await;
        Ok(emitted)
    }

    async fn query_roster(&self) -> Result<Vec<RosterEntry>, CcError> {
        match tokio::time::timeout(self.config.roster_query_timeout, self.sdk.get_roster()).await
        {
            Ok(Ok(roster)) => Ok(roster),
            Ok(Err(e)) => Err(CcError::ReconciliationQueryFailed(e.to_string())),
            Err(_) => Err(CcError::ReconciliationQueryFailed(format!(
                "roster query timed out after {}ms",
                self.config.roster_query_timeout.as_millis()
            ))),
        }
    }

    /// Publish reconciler output, then bring pagination up to date.
    async fn publish(&mut self, events: Vec<ClassEvent>) {
        if events.is_empty() {
            return;
        }
        self.bus.publish_all(events);
        self.refresh_pagination().await;
    }

    async fn refresh_pagination(&mut self) {
        let self_id = self.reconciler.self_id().map(str::to_string);
        let is_remote = |id: &str| Some(id) != self_id.as_deref();

        let ids = self.reconciler.remote_ids();
        let coach = self.reconciler.coach_id().filter(|id| is_remote(id));
        let speaker = self
            .reconciler
            .active_speaker()
            .filter(|id| is_remote(id))
            .map(str::to_string);

        let change = self
            .pagination
            .update(&ids, coach.as_deref(), speaker.as_deref());
        self.apply_page_change(change).await;
    }

    /// Push a pagination diff to the SDK and announce it.
    ///
    /// Subscription failures are logged; the next diff retries nothing, the
    /// tile simply stays dark until the page changes.
    async fn apply_page_change(&mut self, change: PageChange) {
        if !change.changed {
            return;
        }

        for id in &change.unsubscribe {
            if let Err(e) = self.sdk.unsubscribe(id).await {
                warn!(
                    target: "cc.actor.session",
                    session_id = %self.session_id,
                    participant_id = %id,
                    error = %e,
                    "Unsubscribe failed"
                );
            }
        }

        let quality =
            SubscriptionQuality::for_visible_count(change.visible.len()).capped_by(self.strategy);
        for id in &change.subscribe {
            if let Err(e) = self.sdk.subscribe(id, quality).await {
                warn!(
                    target: "cc.actor.session",
                    session_id = %self.session_id,
                    participant_id = %id,
                    error = %e,
                    "Subscribe failed"
                );
            }
        }

        self.bus.publish(ClassEvent::Scaling(ScalingEvent::PageChanged {
            page: change.page,
            page_count: change.page_count,
            visible: change.visible,
        }));
    }
}

async fn next_provider_event(
    events: &mut Option<mpsc::Receiver<ProviderEvent>>,
) -> Option<ProviderEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::{EventType, VideoEvent};
    use crate::provider::mock::MockVideoSdk;
    use crate::provider::ProviderKind;
    use crate::types::ParticipantRole;
    use serde_json::json;

    struct Harness {
        sdk: Arc<MockVideoSdk>,
        bus: EventBus,
        handle: SessionActorHandle,
        task: JoinHandle<()>,
        metrics: Arc<ActorMetrics>,
    }

    fn spawn_with(sdk: Arc<MockVideoSdk>, page_size: usize, config: SessionActorConfig) -> Harness {
        let bus = EventBus::default();
        let metrics = ActorMetrics::new();
        let provider_events = sdk.take_events();
        let (handle, task) = SessionActor::spawn(
            SessionActorParams {
                session_id: "yoga-101".to_string(),
                local: Participant::new(sdk.self_id(), "Me", ParticipantRole::Student),
                sdk: Arc::clone(&sdk) as Arc<dyn VideoProviderSdk>,
                provider_events,
                bus: bus.clone(),
                page_size,
                strategy: RenderingStrategy::VideoElement,
                config,
                metrics: Arc::clone(&metrics),
            },
            CancellationToken::new(),
        );
        Harness {
            sdk,
            bus,
            handle,
            task,
            metrics,
        }
    }

    fn spawn_default() -> Harness {
        let sdk = Arc::new(MockVideoSdk::with_self_id(ProviderKind::Zoom, "me"));
        spawn_with(sdk, 25, SessionActorConfig::default())
    }

    #[tokio::test]
    async fn test_vendor_events_update_map_and_publish() {
        let h = spawn_default();
        let mut participants = h.bus.subscribe(EventType::Participant);

        h.sdk.upsert_roster_entry(RosterEntry::new("a", "Alice"));
        h.sdk
            .emit("user-added", json!({"users": [{"userId": "a", "displayName": "Alice"}]}))
            .await;

        let event = participants.recv().await.unwrap();
        assert!(matches!(
            event,
            ClassEvent::Participant(ParticipantEvent::Joined { ref participant, .. }) if participant.id == "a"
        ));
        assert_eq!(h.handle.participant_count().await.unwrap(), 2);
        assert_eq!(h.sdk.subscribed(), vec!["a".to_string()]);

        h.handle.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_self_is_never_subscribed() {
        let h = spawn_default();
        h.sdk.set_roster(vec![RosterEntry::new("me", "Me"), RosterEntry::new("b", "Bob")]);

        h.handle.reconcile_now().await.unwrap();

        assert_eq!(h.sdk.subscribed(), vec!["b".to_string()]);
        assert_eq!(h.handle.participant_count().await.unwrap(), 2);
        h.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_reconciliation_recovers_missed_events() {
        let h = spawn_default();
        let mut participants = h.bus.subscribe(EventType::Participant);

        // Let the immediate first tick run against an empty roster.
        tokio::task::yield_now().await;
        h.sdk.set_roster(vec![RosterEntry::new("a", "Alice"), RosterEntry::new("b", "Bob")]);

        tokio::time::advance(DEFAULT_RECONCILE_INTERVAL).await;
        tokio::task::yield_now().await;

        let first = participants.recv().await.unwrap();
        let second = participants.recv().await.unwrap();
        assert!(matches!(first, ClassEvent::Participant(ParticipantEvent::Joined { .. })));
        assert!(matches!(second, ClassEvent::Participant(ParticipantEvent::Joined { .. })));
        assert_eq!(h.handle.participant_count().await.unwrap(), 3);

        // Unchanged roster: the next pass emits nothing.
        assert_eq!(h.handle.reconcile_now().await.unwrap(), 0);
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_roster_failure_is_not_fatal() {
        let h = spawn_default();
        h.sdk.set_fail_roster(true);

        assert!(matches!(
            h.handle.reconcile_now().await,
            Err(CcError::ReconciliationQueryFailed(_))
        ));

        h.sdk.set_fail_roster(false);
        h.sdk.set_roster(vec![RosterEntry::new("a", "Alice")]);
        assert_eq!(h.handle.reconcile_now().await.unwrap(), 1);
        h.handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_roster_timeout_is_reported() {
        let sdk = Arc::new(MockVideoSdk::with_self_id(ProviderKind::Zoom, "me"));
        sdk.set_roster_delay(Duration::from_secs(10));
        let h = spawn_with(
            sdk,
            25,
            SessionActorConfig {
                reconcile_interval: Duration::from_secs(60),
                ..SessionActorConfig::default()
            },
        );

        let result = h.handle.reconcile_now().await;
        assert!(matches!(result, Err(CcError::ReconciliationQueryFailed(msg)) if msg.contains("timed out")));
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_page_controls_swap_subscriptions() {
        let sdk = Arc::new(MockVideoSdk::with_self_id(ProviderKind::Zoom, "me"));
        let h = spawn_with(sdk, 2, SessionActorConfig::default());
        let mut scaling = h.bus.subscribe(EventType::Scaling);

        h.sdk.set_roster(vec![
            RosterEntry::new("a", "A"),
            RosterEntry::new("b", "B"),
            RosterEntry::new("c", "C"),
        ]);
        h.handle.reconcile_now().await.unwrap();
        assert_eq!(h.sdk.subscribed(), vec!["a".to_string(), "b".to_string()]);

        let page = h.handle.next_page().await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.page_count, 2);
        assert_eq!(h.sdk.subscribed(), vec!["c".to_string()]);

        let page = h.handle.set_page(9).await.unwrap();
        assert_eq!(page.page, 1);

        let page = h.handle.previous_page().await.unwrap();
        assert_eq!(page.page, 0);

        let changes = scaling.drain();
        assert!(changes.len() >= 3);
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_apply_event_through_handle() {
        let h = spawn_default();
        let mut videos = h.bus.subscribe(EventType::Video);
        h.sdk.upsert_roster_entry(RosterEntry::new("a", "Alice"));

        h.handle
            .apply_event(ProviderEvent::new("joined", json!({"userId": "a"})))
            .await
            .unwrap();
        h.handle
            .apply_event(ProviderEvent::new("peer-video-on", json!({"userId": "a"})))
            .await
            .unwrap();
        h.handle
            .apply_event(ProviderEvent::new("chat-message", json!({"text": "hi"})))
            .await
            .unwrap();

        let event = videos.recv().await.unwrap();
        assert_eq!(
            event,
            ClassEvent::Video(VideoEvent::Changed {
                participant_id: "a".to_string(),
                video_on: true
            })
        );
        h.handle.cancel();
    }

    #[tokio::test]
    async fn test_cancel_stops_actor_and_updates_metrics() {
        let h = spawn_default();
        assert_eq!(h.metrics.active_session_count(), 1);

        h.handle.cancel();
        h.task.await.unwrap();

        assert!(h.handle.is_cancelled());
        assert_eq!(h.metrics.active_session_count(), 0);
        assert!(h.handle.participants().await.is_err());
    }
}
