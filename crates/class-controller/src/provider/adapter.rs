//! `VideoProviderAdapter` - uniform join/leave over one vendor SDK.
//!
//! The adapter initializes the SDK once, joins the vendor session and
//! hands the event stream to a freshly spawned `SessionActor`. Leaving
//! stops the actor before telling the vendor, so no event is applied
//! after the session is torn down.

use super::{ProviderKind, RenderingStrategy, VideoProviderSdk};
use crate::actors::metrics::ActorMetrics;
use crate::actors::session::{SessionActor, SessionActorConfig, SessionActorHandle, SessionActorParams};
use crate::errors::CcError;
use crate::events::EventBus;
use crate::types::{Participant, ParticipantRole, SessionId};

use secrecy::SecretString;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Upper bound on waiting for the session actor to stop.
const ACTOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// What a join needs from the caller.
#[derive(Debug)]
pub struct JoinParams {
    /// Class topic as typed by the user.
    pub topic: String,
    pub display_name: String,
    pub role: ParticipantRole,
    /// Vendor join credential.
    pub credential: SecretString,
    /// Tiles per page.
    pub page_size: usize,
}

struct ActiveSession {
    handle: SessionActorHandle,
    task: JoinHandle<()>,
}

/// One provider kind's SDK plus its live session.
pub struct VideoProviderAdapter {
    kind: ProviderKind,
    strategy: RenderingStrategy,
    sdk: Arc<dyn VideoProviderSdk>,
    config: SessionActorConfig,
    initialized: AtomicBool,
    active: Mutex<Option<ActiveSession>>,
}

impl VideoProviderAdapter {
    /// Wrap an SDK instance.
    pub fn new(
        kind: ProviderKind,
        sdk: Arc<dyn VideoProviderSdk>,
        strategy: RenderingStrategy,
        config: SessionActorConfig,
    ) -> Self {
        Self {
            kind,
            strategy,
            sdk,
            config,
            initialized: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    #[must_use]
    pub fn strategy(&self) -> RenderingStrategy {
        self.strategy
    }

    /// Initialize the SDK. No-op once it has succeeded.
    ///
    /// # Errors
    ///
    /// `ProviderInitFailed` if the SDK fails to load.
    pub async fn initialize(&self) -> Result<(), CcError> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.sdk.initialize().await.map_err(|e| match e {
            CcError::ProviderInitFailed(_) => e,
            other => CcError::ProviderInitFailed(other.to_string()),
        })?;
        self.initialized.store(true, Ordering::SeqCst);

        info!(target: "cc.provider", provider = %self.kind, "Provider SDK initialized");
        Ok(())
    }

    /// Join the vendor session and start its session actor.
    ///
    /// Joining while already joined leaves the previous session first.
    ///
    /// # Errors
    ///
    /// `InvalidTopic`, `ProviderInitFailed` or `ProviderJoinFailed`.
    #[instrument(skip_all, name = "cc.provider.join", fields(provider = %self.kind, topic = %params.topic))]
    pub async fn join(
        &self,
        params: &JoinParams,
        bus: EventBus,
        metrics: Arc<ActorMetrics>,
    ) -> Result<SessionActorHandle, CcError> {
        let session_id = SessionId::from_topic(&params.topic)?;
        self.initialize().await?;

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.stop(previous).await;
        }

        let self_id = self
            .sdk
            .join(session_id.as_str(), &params.credential, &params.display_name)
            .await
            .map_err(|e| match e {
                CcError::ProviderJoinFailed(_) => e,
                other => CcError::ProviderJoinFailed(other.to_string()),
            })?;

        let (handle, task) = SessionActor::spawn(
            SessionActorParams {
                session_id: session_id.to_string(),
                local: Participant::new(self_id, params.display_name.clone(), params.role),
                sdk: Arc::clone(&self.sdk),
                provider_events: self.sdk.take_events(),
                bus,
                page_size: params.page_size,
                strategy: self.strategy,
                config: self.config.clone(),
                metrics,
            },
            CancellationToken::new(),
        );

        info!(
            target: "cc.provider",
            provider = %self.kind,
            session_id = %session_id,
            role = params.role.as_str(),
            "Joined provider session"
        );

        *active = Some(ActiveSession {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    /// Leave the current session, if any.
    ///
    /// Vendor leave failures are logged; the adapter is left unjoined
    /// either way.
    pub async fn leave(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.stop(previous).await;
        }
    }

    /// Handle of the live session actor.
    pub async fn handle(&self) -> Option<SessionActorHandle> {
        self.active.lock().await.as_ref().map(|a| a.handle.clone())
    }

    pub async fn is_joined(&self) -> bool {
        self.active.lock().await.is_some()
    }

    async fn stop(&self, session: ActiveSession) {
        let session_id = session.handle.session_id().to_string();
        session.handle.cancel();

        match tokio::time::timeout(ACTOR_STOP_TIMEOUT, session.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    target: "cc.provider",
                    provider = %self.kind,
                    session_id = %session_id,
                    error = %e,
                    "Session actor ended abnormally"
                );
            }
            Err(_) => {
                warn!(
                    target: "cc.provider",
                    provider = %self.kind,
                    session_id = %session_id,
                    "Session actor did not stop in time"
                );
            }
        }

        if let Err(e) = self.sdk.leave().await {
            warn!(
                target: "cc.provider",
                provider = %self.kind,
                session_id = %session_id,
                error = %e,
                "Provider leave failed"
            );
        }

        info!(
            target: "cc.provider",
            provider = %self.kind,
            session_id = %session_id,
            "Left provider session"
        );
    }
}
