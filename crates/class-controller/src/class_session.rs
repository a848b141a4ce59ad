//! `ClassSession` - one user's participation in one class.
//!
//! The facade the UI layer talks to. A join registers with the
//! coordinator first, then joins the video provider; if the primary
//! provider cannot initialize or join, the session switches to the
//! fallback and retries once. Event subscriptions live on a bus owned by
//! the `ClassSession`, so they survive provider switchovers and rejoins.

use crate::actors::coordinator::SessionCoordinatorHandle;
use crate::actors::metrics::ActorMetrics;
use crate::actors::session::SessionActorHandle;
use crate::errors::CcError;
use crate::events::{ClassEvent, ConnectionEvent, EventBus, EventSubscription, EventType};
use crate::pagination::{DeviceClass, PageSizes, PageState};
use crate::provider::{JoinParams, ProviderKind, VideoProviderAdapter, VideoServiceProvider};
use crate::types::{Member, Participant, ParticipantRole, SessionId, SessionMetadata};

use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// What the UI submits to join a class.
#[derive(Debug)]
pub struct JoinRequest {
    /// Class topic as typed by the user.
    pub topic: String,
    pub display_name: String,
    pub role: ParticipantRole,
    /// Vendor join credential, minted elsewhere.
    pub credential: SecretString,
    pub device_class: DeviceClass,
}

struct Joined {
    session_id: SessionId,
    /// Seat key in the coordinator, fresh for every join.
    member: Member,
    params: JoinParams,
    adapter: Arc<VideoProviderAdapter>,
    handle: SessionActorHandle,
}

/// UI-facing session facade.
pub struct ClassSession {
    coordinator: SessionCoordinatorHandle,
    providers: VideoServiceProvider,
    page_sizes: PageSizes,
    bus: EventBus,
    metrics: Arc<ActorMetrics>,
    joined: Mutex<Option<Joined>>,
}

impl ClassSession {
    pub fn new(
        coordinator: SessionCoordinatorHandle,
        providers: VideoServiceProvider,
        page_sizes: PageSizes,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        Self {
            coordinator,
            providers,
            page_sizes,
            bus: EventBus::default(),
            metrics,
            joined: Mutex::new(None),
        }
    }

    /// Subscribe to one event stream.
    #[must_use]
    pub fn subscribe(&self, event_type: EventType) -> EventSubscription {
        self.bus.subscribe(event_type)
    }

    /// Subscribe to every event stream.
    #[must_use]
    pub fn subscribe_all(&self) -> EventSubscription {
        self.bus.subscribe_all()
    }

    /// Join a class. Joining while joined leaves the current class first.
    ///
    /// # Errors
    ///
    /// Coordinator refusals (`SessionNotFound`, `SessionNotReady`,
    /// `CapacityExceeded`, `InvalidTopic`) or provider failures once the
    /// fallback has also failed.
    #[instrument(skip_all, name = "cc.session.join", fields(topic = %request.topic, role = request.role.as_str()))]
    pub async fn join(&self, request: JoinRequest) -> Result<SessionMetadata, CcError> {
        let mut joined = self.joined.lock().await;
        if let Some(previous) = joined.take() {
            self.depart(previous).await;
        }

        let member = Member::with_random_id(request.display_name.clone());
        let metadata = self
            .coordinator
            .get_or_create_session(&request.topic, member.clone(), request.role)
            .await?;

        let params = JoinParams {
            topic: request.topic,
            display_name: request.display_name,
            role: request.role,
            credential: request.credential,
            page_size: self.page_sizes.for_device(request.device_class),
        };

        let (adapter, handle) = match self.join_provider(&params).await {
            Ok(joined) => joined,
            Err(e) => {
                self.release_seat(&metadata.id, &member.id).await;
                return Err(e);
            }
        };

        self.bus.publish(ClassEvent::Connection(ConnectionEvent::Joined {
            provider: adapter.kind(),
        }));
        info!(
            target: "cc.session",
            session_id = %metadata.id,
            provider = %adapter.kind(),
            "Joined class"
        );

        *joined = Some(Joined {
            session_id: metadata.id.clone(),
            member,
            params,
            adapter,
            handle,
        });
        Ok(metadata)
    }

    /// Leave the class.
    ///
    /// # Errors
    ///
    /// `NotJoined` if no class is joined.
    pub async fn leave(&self) -> Result<(), CcError> {
        let previous = self.joined.lock().await.take().ok_or(CcError::NotJoined)?;
        self.depart(previous).await;
        Ok(())
    }

    /// Switch the live session to the fallback provider.
    ///
    /// Returns the provider now in use. When not joined only the provider
    /// slots change.
    ///
    /// # Errors
    ///
    /// `SwitchoverInProgress`, `ProviderInitFailed` (no fallback), or the
    /// rejoin failure; a failed rejoin leaves the class.
    pub async fn switch_to_fallback(&self) -> Result<ProviderKind, CcError> {
        let from = self.providers.current_kind().await;
        let adapter = self.providers.switch_to_fallback().await?;
        let to = adapter.kind();

        let mut joined = self.joined.lock().await;
        if let Some(current) = joined.as_mut() {
            match adapter
                .join(&current.params, self.bus.clone(), Arc::clone(&self.metrics))
                .await
            {
                Ok(handle) => {
                    current.adapter = adapter;
                    current.handle = handle;
                }
                Err(e) => {
                    if let Some(previous) = joined.take() {
                        self.depart(previous).await;
                    }
                    return Err(e);
                }
            }
        }

        self.bus
            .publish(ClassEvent::Connection(ConnectionEvent::ProviderSwitched { from, to }));
        Ok(to)
    }

    /// Whether a class is joined.
    pub async fn is_joined(&self) -> bool {
        self.joined.lock().await.is_some()
    }

    /// Provider the session currently uses.
    pub async fn current_provider(&self) -> ProviderKind {
        self.providers.current_kind().await
    }

    /// Participants in join order, local participant first.
    ///
    /// # Errors
    ///
    /// `NotJoined` if no class is joined.
    pub async fn participants(&self) -> Result<Vec<Participant>, CcError> {
        self.handle().await?.participants().await
    }

    pub async fn participant_count(&self) -> Result<usize, CcError> {
        self.handle().await?.participant_count().await
    }

    /// Registry view of the joined session with the live participant count.
    pub async fn session_info(&self) -> Result<SessionMetadata, CcError> {
        let (session_id, handle) = {
            let joined = self.joined.lock().await;
            let current = joined.as_ref().ok_or(CcError::NotJoined)?;
            (current.session_id.clone(), current.handle.clone())
        };

        let mut metadata = self.coordinator.get_session(session_id.as_str()).await?;
        let live = handle.participant_count().await?;
        metadata.participant_count = u32::try_from(live).unwrap_or(u32::MAX);
        Ok(metadata)
    }

    /// Reconcile against the provider roster now.
    ///
    /// Returns the number of corrections published.
    pub async fn refresh(&self) -> Result<usize, CcError> {
        self.handle().await?.reconcile_now().await
    }

    pub async fn page(&self) -> Result<PageState, CcError> {
        self.handle().await?.page().await
    }

    pub async fn next_page(&self) -> Result<PageState, CcError> {
        self.handle().await?.next_page().await
    }

    pub async fn previous_page(&self) -> Result<PageState, CcError> {
        self.handle().await?.previous_page().await
    }

    /// Jump to a page; out-of-range pages clamp.
    pub async fn set_page(&self, page: usize) -> Result<PageState, CcError> {
        self.handle().await?.set_page(page).await
    }

    async fn handle(&self) -> Result<SessionActorHandle, CcError> {
        self.joined
            .lock()
            .await
            .as_ref()
            .map(|j| j.handle.clone())
            .ok_or(CcError::NotJoined)
    }

    /// Join the current provider, falling back once on provider failure.
    async fn join_provider(
        &self,
        params: &JoinParams,
    ) -> Result<(Arc<VideoProviderAdapter>, SessionActorHandle), CcError> {
        let from = self.providers.current_kind().await;
        let attempt = match self.providers.current_service().await {
            Ok(adapter) => adapter
                .join(params, self.bus.clone(), Arc::clone(&self.metrics))
                .await
                .map(|handle| (adapter, handle)),
            Err(e) => Err(e),
        };

        match attempt {
            Err(e @ (CcError::ProviderInitFailed(_) | CcError::ProviderJoinFailed(_))) => {
                if self.providers.fallback_kind().await.is_none() {
                    return Err(e);
                }
                warn!(
                    target: "cc.session",
                    provider = %from,
                    error = %e,
                    "Primary provider failed, retrying on fallback"
                );

                let adapter = self.providers.switch_to_fallback().await?;
                let handle = adapter
                    .join(params, self.bus.clone(), Arc::clone(&self.metrics))
                    .await?;
                self.bus
                    .publish(ClassEvent::Connection(ConnectionEvent::ProviderSwitched {
                        from,
                        to: adapter.kind(),
                    }));
                Ok((adapter, handle))
            }
            other => other,
        }
    }

    async fn depart(&self, joined: Joined) {
        joined.adapter.leave().await;
        self.release_seat(&joined.session_id, &joined.member.id).await;
        self.bus.publish(ClassEvent::Connection(ConnectionEvent::Left));
        info!(
            target: "cc.session",
            session_id = %joined.session_id,
            "Left class"
        );
    }

    async fn release_seat(&self, session_id: &SessionId, member_id: &str) {
        match self
            .coordinator
            .remove_participant(session_id.as_str(), member_id)
            .await
        {
            Ok(_) => {}
            Err(e @ (CcError::SessionNotFound(_) | CcError::ParticipantNotFound(_))) => {
                debug!(target: "cc.session", session_id = %session_id, error = %e, "Seat already released");
            }
            Err(e) => {
                warn!(target: "cc.session", session_id = %session_id, error = %e, "Failed to release seat");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::coordinator::{CoordinatorConfig, SessionCoordinatorActor};
    use crate::actors::session::SessionActorConfig;
    use crate::discovery::SessionDiscoveryService;
    use crate::provider::mock::MockProviderFactory;
    use crate::provider::{ProviderFactory, RenderingStrategy, RosterEntry};
    use crate::types::SessionStatus;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        coordinator: SessionCoordinatorHandle,
        factory: Arc<MockProviderFactory>,
    }

    impl Fixture {
        fn new() -> Self {
            let (coordinator, _task) = SessionCoordinatorActor::spawn(
                "cc-test".to_string(),
                SessionDiscoveryService::in_memory(),
                CoordinatorConfig::default(),
                CancellationToken::new(),
                ActorMetrics::new(),
            );
            Self {
                coordinator,
                factory: Arc::new(MockProviderFactory::new()),
            }
        }

        fn session(&self, fallback: Option<ProviderKind>, page_sizes: PageSizes) -> ClassSession {
            ClassSession::new(
                self.coordinator.clone(),
                VideoServiceProvider::new(
                    Arc::clone(&self.factory) as Arc<dyn ProviderFactory>,
                    ProviderKind::Zoom,
                    fallback,
                    RenderingStrategy::VideoElement,
                    SessionActorConfig::default(),
                ),
                page_sizes,
                ActorMetrics::new(),
            )
        }
    }

    fn request(topic: &str, name: &str, role: ParticipantRole) -> JoinRequest {
        JoinRequest {
            topic: topic.to_string(),
            display_name: name.to_string(),
            role,
            credential: SecretString::from("token".to_string()),
            device_class: DeviceClass::Desktop,
        }
    }

    #[tokio::test]
    async fn test_coach_join_starts_session() {
        let fixture = Fixture::new();
        let session = fixture.session(None, PageSizes::default());
        let mut connection = session.subscribe(EventType::Connection);

        let metadata = session
            .join(request("Morning Yoga", "Coach Kim", ParticipantRole::Coach))
            .await
            .unwrap();

        assert_eq!(metadata.status, SessionStatus::Active);
        assert_eq!(
            connection.recv().await.unwrap(),
            ClassEvent::Connection(ConnectionEvent::Joined {
                provider: ProviderKind::Zoom
            })
        );
        let participants = session.participants().await.unwrap();
        assert_eq!(participants.first().unwrap().role, ParticipantRole::Coach);
        assert!(session.is_joined().await);
    }

    #[tokio::test]
    async fn test_student_refused_before_provider_join() {
        let fixture = Fixture::new();
        let session = fixture.session(None, PageSizes::default());

        let err = session
            .join(request("Spin", "Sam", ParticipantRole::Student))
            .await
            .unwrap_err();

        assert!(matches!(err, CcError::SessionNotFound(_)));
        assert_eq!(fixture.factory.sdk(ProviderKind::Zoom).join_calls(), 0);
        assert!(matches!(session.participants().await, Err(CcError::NotJoined)));
    }

    #[tokio::test]
    async fn test_primary_failure_retries_on_fallback() {
        let fixture = Fixture::new();
        fixture.factory.sdk(ProviderKind::Zoom).set_fail_join(true);
        let session = fixture.session(Some(ProviderKind::Agora), PageSizes::default());
        let mut connection = session.subscribe(EventType::Connection);

        session
            .join(request("HIIT", "Coach", ParticipantRole::Coach))
            .await
            .unwrap();

        assert_eq!(session.current_provider().await, ProviderKind::Agora);
        assert_eq!(
            connection.recv().await.unwrap(),
            ClassEvent::Connection(ConnectionEvent::ProviderSwitched {
                from: ProviderKind::Zoom,
                to: ProviderKind::Agora
            })
        );
        assert_eq!(
            connection.recv().await.unwrap(),
            ClassEvent::Connection(ConnectionEvent::Joined {
                provider: ProviderKind::Agora
            })
        );
    }

    #[tokio::test]
    async fn test_provider_failure_releases_seat() {
        let fixture = Fixture::new();
        fixture
            .factory
            .sdk(ProviderKind::Zoom)
            .set_fail_initialize(true);
        let session = fixture.session(None, PageSizes::default());

        let err = session
            .join(request("Barre", "Coach", ParticipantRole::Coach))
            .await
            .unwrap_err();

        assert!(matches!(err, CcError::ProviderInitFailed(_)));
        let metadata = fixture.coordinator.get_session("barre").await.unwrap();
        assert_eq!(metadata.status, SessionStatus::Ended);
        assert!(!session.is_joined().await);
    }

    #[tokio::test]
    async fn test_leave_releases_seat_and_publishes() {
        let fixture = Fixture::new();
        let coach = fixture.session(None, PageSizes::default());
        let student = fixture.session(None, PageSizes::default());
        coach
            .join(request("Core", "Coach", ParticipantRole::Coach))
            .await
            .unwrap();
        student
            .join(request("Core", "Ana", ParticipantRole::Student))
            .await
            .unwrap();
        assert_eq!(
            fixture.coordinator.get_session("core").await.unwrap().participant_count,
            2
        );

        let mut connection = student.subscribe(EventType::Connection);
        student.leave().await.unwrap();

        assert_eq!(
            connection.recv().await.unwrap(),
            ClassEvent::Connection(ConnectionEvent::Left)
        );
        assert_eq!(
            fixture.coordinator.get_session("core").await.unwrap().participant_count,
            1
        );
        assert!(matches!(student.leave().await, Err(CcError::NotJoined)));
    }

    #[tokio::test]
    async fn test_switch_rejoins_on_fallback() {
        let fixture = Fixture::new();
        let session = fixture.session(Some(ProviderKind::Agora), PageSizes::default());
        session
            .join(request("Pilates", "Coach", ParticipantRole::Coach))
            .await
            .unwrap();

        let now = session.switch_to_fallback().await.unwrap();

        assert_eq!(now, ProviderKind::Agora);
        assert_eq!(fixture.factory.sdk(ProviderKind::Zoom).leave_calls(), 1);
        assert_eq!(fixture.factory.sdk(ProviderKind::Agora).join_calls(), 1);
        assert_eq!(session.participant_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_info_and_paging_follow_live_roster() {
        let fixture = Fixture::new();
        fixture
            .coordinator
            .get_or_create_session("Boxing", "Coach", ParticipantRole::Coach)
            .await
            .unwrap();
        let session = fixture.session(
            None,
            PageSizes {
                desktop: 2,
                mobile: 2,
            },
        );
        session
            .join(request("Boxing", "Ana", ParticipantRole::Student))
            .await
            .unwrap();

        let sdk = fixture.factory.sdk(ProviderKind::Zoom);
        for id in ["r1", "r2", "r3"] {
            sdk.upsert_roster_entry(RosterEntry::new(id, id));
        }
        session.refresh().await.unwrap();

        assert_eq!(session.session_info().await.unwrap().participant_count, 4);

        let first = session.page().await.unwrap();
        assert_eq!(first.page_count, 2);
        assert_eq!(first.visible, vec!["r1".to_string(), "r2".to_string()]);

        let second = session.next_page().await.unwrap();
        assert_eq!(second.page, 1);
        assert_eq!(second.visible, vec!["r3".to_string()]);

        assert_eq!(session.set_page(9).await.unwrap().page, 1);
        assert_eq!(session.previous_page().await.unwrap().page, 0);
    }
}
