//! Registry cleanup background task.
//!
//! Sessions that were never ended cleanly (crashed clients, lost
//! connectivity) would otherwise stay discoverable forever. Each sweep
//! first has the coordinator drop its own sessions older than the
//! configured maximum age, then evicts whatever old registry entries
//! remain (written by instances that are gone), regardless of status.
//!
//! # Graceful Shutdown
//!
//! The task completes its current sweep and exits when the cancellation
//! token is triggered.

use crate::actors::coordinator::SessionCoordinatorHandle;
use crate::discovery::SessionDiscoveryService;
use crate::observability::metrics as prom;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default sweep interval (10 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Default maximum session age (2 hours).
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(7200);

/// Configuration for the registry cleanup task.
#[derive(Debug, Clone)]
pub struct RegistryCleanupConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Entries created longer ago than this are evicted.
    pub max_age: Duration,
}

impl Default for RegistryCleanupConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            max_age: DEFAULT_MAX_SESSION_AGE,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions the coordinator dropped.
    pub sessions_expired: usize,
    /// Registry entries evicted afterwards.
    pub registry_evicted: usize,
}

/// Start the registry cleanup background task.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "cc.task.registry_cleanup")]
pub async fn start_registry_cleanup(
    discovery: SessionDiscoveryService,
    coordinator: SessionCoordinatorHandle,
    config: RegistryCleanupConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "cc.task.registry_cleanup",
        interval_seconds = config.interval.as_secs(),
        max_age_seconds = config.max_age.as_secs(),
        "Starting registry cleanup task"
    );

    let mut interval = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cleanup(&coordinator, &discovery, config.max_age).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "cc.task.registry_cleanup",
                    "Registry cleanup task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "cc.task.registry_cleanup", "Registry cleanup task stopped");
}

/// Run a single sweep.
pub async fn run_cleanup(
    coordinator: &SessionCoordinatorHandle,
    discovery: &SessionDiscoveryService,
    max_age: Duration,
) -> SweepReport {
    let sessions_expired = match coordinator.expire_sessions(max_age).await {
        Ok(count) => {
            if count > 0 {
                info!(
                    target: "cc.task.registry_cleanup",
                    expired = count,
                    "Coordinator dropped expired sessions"
                );
            }
            count
        }
        Err(e) => {
            warn!(
                target: "cc.task.registry_cleanup",
                error = %e,
                "Coordinator expiry failed, retrying next interval"
            );
            prom::record_error("session_expiry", e.metric_label(), e.error_code());
            0
        }
    };

    SweepReport {
        sessions_expired,
        registry_evicted: evict_registry_entries(discovery, max_age).await,
    }
}

async fn evict_registry_entries(discovery: &SessionDiscoveryService, max_age: Duration) -> usize {
    match discovery.cleanup_expired(max_age).await {
        Ok(0) => {
            debug!(target: "cc.task.registry_cleanup", "No expired registry entries");
            0
        }
        Ok(count) => {
            info!(
                target: "cc.task.registry_cleanup",
                evicted = count,
                "Evicted expired sessions"
            );
            prom::record_registry_evictions("expired", count);
            count
        }
        Err(e) => {
            warn!(
                target: "cc.task.registry_cleanup",
                error = %e,
                "Registry sweep failed, retrying next interval"
            );
            prom::record_error("registry_cleanup", e.metric_label(), e.error_code());
            0
        }
    }
}
