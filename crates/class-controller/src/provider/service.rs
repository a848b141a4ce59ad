//! `VideoServiceProvider` - primary/fallback adapter slots.
//!
//! Adapters are built lazily through a [`ProviderFactory`]. A switchover
//! tears down the primary (best-effort), promotes the fallback and makes
//! the old primary kind the new fallback kind, leaving that slot empty
//! until it is needed.

use super::adapter::VideoProviderAdapter;
use super::{ProviderFactory, ProviderKind, RenderingStrategy};
use crate::actors::session::SessionActorConfig;
use crate::errors::CcError;
use crate::observability::metrics as prom;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

struct ProviderSlots {
    primary_kind: ProviderKind,
    fallback_kind: Option<ProviderKind>,
    primary: Option<Arc<VideoProviderAdapter>>,
    fallback: Option<Arc<VideoProviderAdapter>>,
}

/// Clears the in-flight flag when the switchover finishes or is dropped.
struct SwitchGuard<'a>(&'a AtomicBool);

impl Drop for SwitchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Selects and owns the provider adapters for one participant.
pub struct VideoServiceProvider {
    factory: Arc<dyn ProviderFactory>,
    strategy: RenderingStrategy,
    session_config: SessionActorConfig,
    slots: Mutex<ProviderSlots>,
    switching: AtomicBool,
}

impl VideoServiceProvider {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        primary_kind: ProviderKind,
        fallback_kind: Option<ProviderKind>,
        strategy: RenderingStrategy,
        session_config: SessionActorConfig,
    ) -> Self {
        Self {
            factory,
            strategy,
            session_config,
            slots: Mutex::new(ProviderSlots {
                primary_kind,
                // A fallback of the same kind would switch to itself.
                fallback_kind: fallback_kind.filter(|k| *k != primary_kind),
                primary: None,
                fallback: None,
            }),
            switching: AtomicBool::new(false),
        }
    }

    /// The primary adapter, constructed on first use.
    ///
    /// # Errors
    ///
    /// `ProviderInitFailed` if the factory cannot build the SDK.
    pub async fn primary(&self) -> Result<Arc<VideoProviderAdapter>, CcError> {
        let mut slots = self.slots.lock().await;
        if let Some(primary) = &slots.primary {
            return Ok(Arc::clone(primary));
        }
        let adapter = self.build(slots.primary_kind)?;
        slots.primary = Some(Arc::clone(&adapter));
        Ok(adapter)
    }

    /// The fallback adapter, constructed on first use. `None` when no
    /// fallback kind is configured.
    ///
    /// # Errors
    ///
    /// `ProviderInitFailed` if the factory cannot build the SDK.
    pub async fn fallback(&self) -> Result<Option<Arc<VideoProviderAdapter>>, CcError> {
        let mut slots = self.slots.lock().await;
        let Some(kind) = slots.fallback_kind else {
            return Ok(None);
        };
        if let Some(fallback) = &slots.fallback {
            return Ok(Some(Arc::clone(fallback)));
        }
        let adapter = self.build(kind)?;
        slots.fallback = Some(Arc::clone(&adapter));
        Ok(Some(adapter))
    }

    /// Adapter new joins should use.
    ///
    /// # Errors
    ///
    /// See [`Self::primary`].
    pub async fn current_service(&self) -> Result<Arc<VideoProviderAdapter>, CcError> {
        self.primary().await
    }

    pub async fn current_kind(&self) -> ProviderKind {
        self.slots.lock().await.primary_kind
    }

    pub async fn fallback_kind(&self) -> Option<ProviderKind> {
        self.slots.lock().await.fallback_kind
    }

    /// Whether a fallback adapter has been constructed.
    pub async fn has_fallback_instance(&self) -> bool {
        self.slots.lock().await.fallback.is_some()
    }

    #[must_use]
    pub fn is_switching(&self) -> bool {
        self.switching.load(Ordering::SeqCst)
    }

    /// Tear down the primary and promote the fallback.
    ///
    /// Returns the new primary adapter (not joined).
    ///
    /// # Errors
    ///
    /// - `SwitchoverInProgress` if another switchover is running
    /// - `ProviderInitFailed` if no fallback is configured or it cannot be built
    #[instrument(skip_all, name = "cc.provider.switchover")]
    pub async fn switch_to_fallback(&self) -> Result<Arc<VideoProviderAdapter>, CcError> {
        if self
            .switching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(target: "cc.provider", "Switchover rejected, one is already running");
            return Err(CcError::SwitchoverInProgress);
        }
        let _guard = SwitchGuard(&self.switching);

        let started = Instant::now();
        let result = self.promote_fallback().await;
        let status = if result.is_ok() { "success" } else { "error" };
        prom::record_switchover(status, started.elapsed());
        result
    }

    async fn promote_fallback(&self) -> Result<Arc<VideoProviderAdapter>, CcError> {
        let (previous, fallback_kind, prebuilt) = {
            let mut slots = self.slots.lock().await;
            (slots.primary.take(), slots.fallback_kind, slots.fallback.take())
        };

        let Some(fallback_kind) = fallback_kind else {
            self.slots.lock().await.primary = previous;
            return Err(CcError::ProviderInitFailed(
                "no fallback provider configured".to_string(),
            ));
        };

        // Build before tearing down so a failed build leaves the primary intact.
        let next = match prebuilt {
            Some(adapter) => adapter,
            None => match self.build(fallback_kind) {
                Ok(adapter) => adapter,
                Err(e) => {
                    self.slots.lock().await.primary = previous;
                    return Err(e);
                }
            },
        };

        if let Some(previous) = &previous {
            previous.leave().await;
        }

        let mut slots = self.slots.lock().await;
        let previous_kind = slots.primary_kind;
        slots.primary_kind = fallback_kind;
        slots.fallback_kind = Some(previous_kind);
        slots.primary = Some(Arc::clone(&next));
        slots.fallback = None;

        info!(
            target: "cc.provider",
            from = %previous_kind,
            to = %fallback_kind,
            "Switched to fallback provider"
        );
        Ok(next)
    }

    fn build(&self, kind: ProviderKind) -> Result<Arc<VideoProviderAdapter>, CcError> {
        let sdk = self.factory.create(kind).map_err(|e| match e {
            CcError::ProviderInitFailed(_) => e,
            other => CcError::ProviderInitFailed(other.to_string()),
        })?;
        Ok(Arc::new(VideoProviderAdapter::new(
            kind,
            sdk,
            self.strategy,
            self.session_config.clone(),
        )))
    }
}
