//! `ClassRuntime` - composition root.
//!
//! Builds and owns the shared services: the discovery registry, the
//! session coordinator, the provider factory and the registry cleanup
//! task. Every `ClassSession` is created from here, so nothing in the
//! crate reaches for global state.

use crate::actors::coordinator::{SessionCoordinatorActor, SessionCoordinatorHandle};
use crate::actors::metrics::{ActorMetrics, ActorType};
use crate::class_session::ClassSession;
use crate::config::Config;
use crate::discovery::SessionDiscoveryService;
use crate::errors::CcError;
use crate::provider::{ProviderFactory, VideoServiceProvider};
use crate::tasks::{run_cleanup, start_registry_cleanup, SweepReport};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Shared services for one process.
pub struct ClassRuntime {
    config: Config,
    discovery: SessionDiscoveryService,
    coordinator: SessionCoordinatorHandle,
    coordinator_task: JoinHandle<()>,
    cleanup_task: JoinHandle<()>,
    factory: Arc<dyn ProviderFactory>,
    metrics: Arc<ActorMetrics>,
    cancel_token: CancellationToken,
    coordinator_failed: AtomicBool,
}

impl ClassRuntime {
    /// Spawn the coordinator and the cleanup task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: Config,
        discovery: SessionDiscoveryService,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let cancel_token = CancellationToken::new();
        let metrics = ActorMetrics::new();

        let (coordinator, coordinator_task) = SessionCoordinatorActor::spawn(
            config.instance_id.clone(),
            discovery.clone(),
            config.coordinator_config(),
            cancel_token.child_token(),
            Arc::clone(&metrics),
        );

        let cleanup_task = tokio::spawn(start_registry_cleanup(
            discovery.clone(),
            coordinator.clone(),
            config.registry_cleanup_config(),
            cancel_token.child_token(),
        ));

        info!(
            target: "cc.runtime",
            instance_id = %config.instance_id,
            primary_provider = %config.primary_provider,
            fallback_provider = ?config.fallback_provider,
            "Class runtime started"
        );

        Self {
            config,
            discovery,
            coordinator,
            coordinator_task,
            cleanup_task,
            factory,
            metrics,
            cancel_token,
            coordinator_failed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn discovery(&self) -> &SessionDiscoveryService {
        &self.discovery
    }

    #[must_use]
    pub fn coordinator(&self) -> &SessionCoordinatorHandle {
        &self.coordinator
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Token cancelled when the runtime shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// A new, unjoined session facade with its own provider slots.
    #[must_use]
    pub fn new_session(&self) -> ClassSession {
        let providers = VideoServiceProvider::new(
            Arc::clone(&self.factory),
            self.config.primary_provider,
            self.config.fallback_provider,
            self.config.rendering_strategy,
            self.config.session_actor_config(),
        );
        ClassSession::new(
            self.coordinator.clone(),
            providers,
            self.config.page_sizes(),
            Arc::clone(&self.metrics),
        )
    }

    /// Run one cleanup sweep now instead of waiting for the interval.
    pub async fn sweep_expired(&self, max_age: Duration) -> SweepReport {
        run_cleanup(&self.coordinator, &self.discovery, max_age).await
    }

    /// Whether the coordinator is still running.
    ///
    /// A coordinator that exited without a shutdown is recorded as a
    /// panic once.
    pub fn check_health(&self) -> bool {
        if !self.coordinator_task.is_finished() || self.cancel_token.is_cancelled() {
            return true;
        }
        if !self.coordinator_failed.swap(true, Ordering::SeqCst) {
            error!(
                target: "cc.runtime",
                instance_id = %self.config.instance_id,
                "Session coordinator exited unexpectedly"
            );
            self.metrics.record_panic(ActorType::Coordinator);
        }
        false
    }

    /// Whether the registry store answers.
    pub async fn check_registry(&self) -> bool {
        match self.discovery.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "cc.runtime", error = %e, "Session registry unreachable");
                false
            }
        }
    }

    /// Cancel everything and wait for the background tasks.
    ///
    /// # Errors
    ///
    /// `Internal` if the tasks do not stop within `timeout`.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), CcError> {
        info!(target: "cc.runtime", "Class runtime shutting down");
        self.cancel_token.cancel();

        let tasks = async {
            if let Err(e) = self.coordinator_task.await {
                warn!(target: "cc.runtime", error = %e, "Coordinator task failed");
            }
            if let Err(e) = self.cleanup_task.await {
                warn!(target: "cc.runtime", error = %e, "Cleanup task failed");
            }
        };

        tokio::time::timeout(timeout, tasks).await.map_err(|_| {
            CcError::Internal(format!(
                "shutdown timed out after {}s",
                timeout.as_secs()
            ))
        })?;

        info!(target: "cc.runtime", "Class runtime stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::class_session::JoinRequest;
    use crate::pagination::DeviceClass;
    use crate::provider::mock::MockProviderFactory;
    use crate::types::ParticipantRole;
    use secrecy::SecretString;

    fn runtime() -> ClassRuntime {
        ClassRuntime::start(
            Config::default(),
            SessionDiscoveryService::in_memory(),
            Arc::new(MockProviderFactory::new()),
        )
    }

    #[tokio::test]
    async fn test_sessions_share_the_coordinator() {
        let runtime = runtime();
        let coach = runtime.new_session();
        coach
            .join(JoinRequest {
                topic: "Evening Flow".to_string(),
                display_name: "Coach".to_string(),
                role: ParticipantRole::Coach,
                credential: SecretString::from("t".to_string()),
                device_class: DeviceClass::Mobile,
            })
            .await
            .unwrap();

        let listed = runtime.discovery().get_available(false).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(runtime.coordinator().status().await.unwrap().sessions_active, 1);
        assert!(runtime.check_health());
        assert!(runtime.check_registry().await);
    }

    #[tokio::test]
    async fn test_shutdown_stops_background_tasks() {
        let runtime = runtime();
        let coordinator = runtime.coordinator().clone();
        let token = runtime.child_token();

        runtime.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(token.is_cancelled());
        assert!(coordinator.is_cancelled());
        assert!(coordinator.status().await.is_err());
    }

    #[tokio::test]
    async fn test_unexpected_coordinator_exit_is_reported() {
        let runtime = runtime();
        runtime.coordinator().cancel();
        while !runtime.coordinator_task.is_finished() {
            tokio::task::yield_now().await;
        }

        assert!(!runtime.check_health());
        assert!(!runtime.check_health());
        assert_eq!(runtime.metrics().panic_count(), 1);
    }
}
