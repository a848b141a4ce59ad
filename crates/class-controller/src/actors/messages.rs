//! Message types for actor communication.
//!
//! All actor communication uses strongly-typed message passing via
//! `tokio::sync::mpsc`. Request-reply uses `tokio::sync::oneshot`.

use crate::errors::CcError;
use crate::pagination::PageState;
use crate::provider::ProviderEvent;
use crate::types::{Member, Participant, ParticipantRole, SessionId, SessionMetadata};
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `SessionCoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Coach creates a session ahead of joining it (status `waiting`).
    CreateSession {
        topic: String,
        coach_id: String,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// Role-based join: coach creates-or-joins, student joins an active session.
    GetOrCreateSession {
        topic: String,
        member: Member,
        role: ParticipantRole,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// Add a participant by session id.
    AddParticipant {
        session_id: String,
        member: Member,
        role: ParticipantRole,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// Remove a participant by member id; the last one out ends the session.
    RemoveParticipant {
        session_id: String,
        member_id: String,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// End a session explicitly.
    EndSession {
        session_id: String,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// Drop sessions older than `max_age`. Sent by the registry cleanup task.
    ExpireSessions {
        max_age: Duration,
        respond_to: oneshot::Sender<Result<usize, CcError>>,
    },

    /// Side-effect-free join check.
    CanUserJoin {
        session_id: String,
        role: ParticipantRole,
        respond_to: oneshot::Sender<Result<JoinEligibility, CcError>>,
    },

    /// Look up a session (ended sessions stay visible until evicted).
    GetSession {
        session_id: String,
        respond_to: oneshot::Sender<Result<SessionMetadata, CcError>>,
    },

    /// Coordinator status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<CoordinatorStatus>,
    },

    /// Grace delay after end elapsed. Sent by the coordinator's own timers.
    EvictSession { session_id: SessionId, generation: u64 },
}

/// Outcome of a join check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinEligibility {
    /// Session is open for this role.
    Eligible,
    /// No live session; a coach join would create one.
    CreatesSession,
    /// No live session and the role cannot create one.
    SessionNotFound,
    /// Session exists but the coach has not started it.
    SessionNotReady,
    /// Session is at capacity.
    SessionFull,
}

impl JoinEligibility {
    /// Whether a join with this outcome would succeed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, JoinEligibility::Eligible | JoinEligibility::CreatesSession)
    }
}

/// Coordinator status snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStatus {
    pub sessions_waiting: usize,
    pub sessions_active: usize,
    pub sessions_ended: usize,
    pub total_participants: usize,
    pub pending_evictions: usize,
}

/// Messages sent to `SessionActor`.
#[derive(Debug)]
pub enum SessionMessage {
    /// Feed a vendor event through the handle instead of the SDK stream.
    ApplyEvent { event: ProviderEvent },

    /// Run a reconciliation pass now; replies with the number of events emitted.
    ReconcileNow {
        respond_to: oneshot::Sender<Result<usize, CcError>>,
    },

    /// Canonical participant snapshot in join order.
    GetParticipants {
        respond_to: oneshot::Sender<Vec<Participant>>,
    },

    /// Canonical participant count (self included).
    GetParticipantCount { respond_to: oneshot::Sender<usize> },

    /// Current page.
    GetPage {
        respond_to: oneshot::Sender<PageState>,
    },

    /// Jump to a page (clamped).
    SetPage {
        page: usize,
        respond_to: oneshot::Sender<PageState>,
    },

    /// Next page (clamped).
    NextPage {
        respond_to: oneshot::Sender<PageState>,
    },

    /// Previous page (clamped).
    PreviousPage {
        respond_to: oneshot::Sender<PageState>,
    },
}
