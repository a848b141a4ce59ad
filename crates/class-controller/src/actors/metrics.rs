//! Actor metrics and mailbox monitoring.
//!
//! | Actor       | Elevated above | Critical above |
//! |-------------|----------------|----------------|
//! | Coordinator | 100            | 500            |
//! | Session     | 200            | 1000           |
//!
//! Session actors absorb vendor event bursts (a whole class joining at the
//! start bell), so their thresholds are higher.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depths at which an actor is considered backed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    pub elevated: usize,
    pub critical: usize,
}

/// Which actor a monitor belongs to; also the metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionCoordinatorActor` (one per runtime).
    Coordinator,
    /// `SessionActor` (one per joined class session).
    Session,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Coordinator => "coordinator",
            ActorType::Session => "session",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Coordinator => MailboxThresholds {
                elevated: 100,
                critical: 500,
            },
            ActorType::Session => MailboxThresholds {
                elevated: 200,
                critical: 1000,
            },
        }
    }
}

/// Mailbox pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

impl MailboxThresholds {
    #[must_use]
    pub const fn level(&self, depth: usize) -> MailboxLevel {
        if depth > self.critical {
            MailboxLevel::Critical
        } else if depth > self.elevated {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Tracks one actor's queue depth and publishes it as a gauge.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Session id or runtime instance id.
    actor_id: String,
    thresholds: MailboxThresholds,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            thresholds: actor_type.thresholds(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// A message (or vendor event) was taken up by the actor.
    ///
    /// Logs once when the depth crosses into `Elevated`, and on every
    /// message while `Critical`.
    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.peak_depth.fetch_max(depth, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);

        match self.thresholds.level(depth) {
            MailboxLevel::Critical => warn!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                critical = self.thresholds.critical,
                "Mailbox depth critical"
            ),
            MailboxLevel::Elevated if depth == self.thresholds.elevated + 1 => debug!(
                target: "cc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                depth,
                "Mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// The message has been handled.
    pub fn record_dequeue(&self) {
        let depth = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)))
            .map_or(0, |previous| previous.saturating_sub(1));
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), depth);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        self.thresholds.level(self.current_depth())
    }
}

/// Counters shared by the coordinator, every session actor and the
/// runtime's health check.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    running_sessions: AtomicUsize,
    panics: AtomicU64,
    messages: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_started(&self) {
        self.running_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_stopped(&self) {
        let _ = self
            .running_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    /// An actor task died without being cancelled.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.panics.fetch_add(1, Ordering::Relaxed);
        prom::record_actor_panic(actor_type.as_str());
    }

    pub fn record_message_processed(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Session actors currently running.
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.running_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }

    /// Messages handled by all actors since start.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }
}
