//! Class Controller error types.
//!
//! Error types map to numeric client codes for the UI layer. Internal details
//! are logged but never exposed through `client_message()`.

use crate::types::SessionStatus;
use thiserror::Error;

/// Class Controller error type.
///
/// Maps to client error codes:
/// - `SessionNotFound`, `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `SessionNotReady`, `SwitchoverInProgress`, `InvalidStatusTransition`: `CONFLICT` (5)
/// - Provider, store, config and internal failures: `INTERNAL_ERROR` (6)
/// - `CapacityExceeded`: `CAPACITY_EXCEEDED` (7)
/// - `InvalidTopic`, `PayloadUnrecognized`: `INVALID_REQUEST` (8)
/// - `NotJoined`: `NOT_JOINED` (9)
#[derive(Debug, Error)]
pub enum CcError {
    /// No session exists for the topic (or it has already ended).
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session exists but the coach has not started it yet.
    #[error("Session not ready: {0}")]
    SessionNotReady(String),

    /// Session is full.
    #[error("Session {session_id} at capacity ({max_participants})")]
    CapacityExceeded {
        session_id: String,
        max_participants: u32,
    },

    /// Topic cannot be turned into a session identity.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Participant is not part of the session.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Provider SDK failed to initialize.
    #[error("Provider initialization failed: {0}")]
    ProviderInitFailed(String),

    /// Provider SDK refused or failed the join.
    #[error("Provider join failed: {0}")]
    ProviderJoinFailed(String),

    /// Live roster query failed (transient, retried on the next tick).
    #[error("Roster query failed: {0}")]
    ReconciliationQueryFailed(String),

    /// Vendor payload carried no recognizable participant records.
    #[error("Unrecognized payload: {0}")]
    PayloadUnrecognized(String),

    /// A provider switchover is already running.
    #[error("Provider switchover already in progress")]
    SwitchoverInProgress,

    /// Session status change would move backwards.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    /// Operation requires a joined session.
    #[error("Not joined to a session")]
    NotJoined,

    /// Registry store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CcError {
    /// Returns the client error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            CcError::SessionNotFound(_) | CcError::ParticipantNotFound(_) => 4, // NOT_FOUND
            CcError::SessionNotReady(_)
            | CcError::SwitchoverInProgress
            | CcError::InvalidStatusTransition { .. } => 5, // CONFLICT
            CcError::ProviderInitFailed(_)
            | CcError::ProviderJoinFailed(_)
            | CcError::ReconciliationQueryFailed(_)
            | CcError::Store(_)
            | CcError::Config(_)
            | CcError::Internal(_) => 6, // INTERNAL_ERROR
            CcError::CapacityExceeded { .. } => 7, // CAPACITY_EXCEEDED
            CcError::InvalidTopic(_) | CcError::PayloadUnrecognized(_) => 8, // INVALID_REQUEST
            CcError::NotJoined => 9,                                         // NOT_JOINED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            CcError::SessionNotFound(_) => "Class not found".to_string(),
            CcError::SessionNotReady(_) => {
                "The coach has not started this class yet".to_string()
            }
            CcError::CapacityExceeded { .. } => "This class is full".to_string(),
            CcError::InvalidTopic(_) => "Invalid class name".to_string(),
            CcError::ParticipantNotFound(_) => "Participant not found".to_string(),
            CcError::ProviderInitFailed(_) | CcError::ProviderJoinFailed(_) => {
                "Unable to connect to the video service".to_string()
            }
            CcError::SwitchoverInProgress => {
                "Video service switch already in progress".to_string()
            }
            CcError::NotJoined => "Not connected to a class".to_string(),
            CcError::ReconciliationQueryFailed(_)
            | CcError::PayloadUnrecognized(_)
            | CcError::InvalidStatusTransition { .. }
            | CcError::Store(_)
            | CcError::Config(_)
            | CcError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether this error is an expected join outcome that callers branch on,
    /// rather than a failure.
    pub fn is_expected_outcome(&self) -> bool {
        matches!(
            self,
            CcError::SessionNotFound(_)
                | CcError::SessionNotReady(_)
                | CcError::CapacityExceeded { .. }
        )
    }

    /// Label for the `error_type` metric dimension.
    pub fn metric_label(&self) -> &'static str {
        match self {
            CcError::SessionNotFound(_) => "session_not_found",
            CcError::SessionNotReady(_) => "session_not_ready",
            CcError::CapacityExceeded { .. } => "capacity_exceeded",
            CcError::InvalidTopic(_) => "invalid_topic",
            CcError::ParticipantNotFound(_) => "participant_not_found",
            CcError::ProviderInitFailed(_) => "provider_init_failed",
            CcError::ProviderJoinFailed(_) => "provider_join_failed",
            CcError::ReconciliationQueryFailed(_) => "reconciliation_query_failed",
            CcError::PayloadUnrecognized(_) => "payload_unrecognized",
            CcError::SwitchoverInProgress => "switchover_in_progress",
            CcError::InvalidStatusTransition { .. } => "invalid_status_transition",
            CcError::NotJoined => "not_joined",
            CcError::Store(_) => "store",
            CcError::Config(_) => "config",
            CcError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(CcError::SessionNotFound("yoga".to_string()).error_code(), 4);
        assert_eq!(
            CcError::ParticipantNotFound("alice".to_string()).error_code(),
            4
        );
        assert_eq!(CcError::SessionNotReady("yoga".to_string()).error_code(), 5);
        assert_eq!(CcError::SwitchoverInProgress.error_code(), 5);
        assert_eq!(
            CcError::ProviderJoinFailed("token rejected".to_string()).error_code(),
            6
        );
        assert_eq!(CcError::Store("timeout".to_string()).error_code(), 6);
        assert_eq!(
            CcError::CapacityExceeded {
                session_id: "yoga".to_string(),
                max_participants: 2
            }
            .error_code(),
            7
        );
        assert_eq!(CcError::InvalidTopic(String::new()).error_code(), 8);
        assert_eq!(CcError::NotJoined.error_code(), 9);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = CcError::Store("connection refused at 10.0.0.7:6379".to_string());
        assert!(!store_err.client_message().contains("10.0.0.7"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let join_err = CcError::ProviderJoinFailed("signature 0xdeadbeef invalid".to_string());
        assert!(!join_err.client_message().contains("deadbeef"));
    }

    #[test]
    fn test_expected_outcomes() {
        assert!(CcError::SessionNotReady("yoga".to_string()).is_expected_outcome());
        assert!(CcError::CapacityExceeded {
            session_id: "yoga".to_string(),
            max_participants: 10
        }
        .is_expected_outcome());
        assert!(!CcError::ProviderInitFailed("boom".to_string()).is_expected_outcome());
        assert!(!CcError::SwitchoverInProgress.is_expected_outcome());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!(
                "{}",
                CcError::InvalidStatusTransition {
                    from: SessionStatus::Ended,
                    to: SessionStatus::Active
                }
            ),
            "Invalid status transition: ended -> active"
        );
        assert_eq!(
            format!(
                "{}",
                CcError::CapacityExceeded {
                    session_id: "yoga-101".to_string(),
                    max_participants: 2
                }
            ),
            "Session yoga-101 at capacity (2)"
        );
    }
}
