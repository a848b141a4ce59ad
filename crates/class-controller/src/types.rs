//! Core data types shared by the coordinator, discovery and session actors.

use crate::errors::CcError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a normalized topic slug.
pub const MAX_TOPIC_LENGTH: usize = 100;

/// Session identity derived from the class topic.
///
/// Coach and student clients compute the same id for the same class name
/// without a rendezvous step. Normalization is idempotent, so an already
/// normalized id can be passed anywhere a topic is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Derive the session id for a topic.
    ///
    /// Trims, lowercases and collapses every run of non-alphanumeric
    /// characters into a single `-`.
    ///
    /// # Errors
    ///
    /// `CcError::InvalidTopic` when nothing alphanumeric remains or the slug
    /// is longer than [`MAX_TOPIC_LENGTH`].
    pub fn from_topic(topic: &str) -> Result<Self, CcError> {
        let mut slug = String::with_capacity(topic.len());
        let mut pending_dash = false;

        for ch in topic.trim().chars() {
            if ch.is_alphanumeric() {
                if pending_dash && !slug.is_empty() {
                    slug.push('-');
                }
                pending_dash = false;
                slug.extend(ch.to_lowercase());
            } else {
                pending_dash = true;
            }
        }

        if slug.is_empty() {
            return Err(CcError::InvalidTopic(
                "topic has no alphanumeric characters".to_string(),
            ));
        }
        if slug.chars().count() > MAX_TOPIC_LENGTH {
            return Err(CcError::InvalidTopic(format!(
                "topic longer than {MAX_TOPIC_LENGTH} characters"
            )));
        }

        Ok(Self(slug))
    }

    /// The normalized slug.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role of a participant in a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Leads the class; creates the session.
    Coach,
    /// Discovers and joins an active session.
    Student,
}

impl ParticipantRole {
    /// Returns the role as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Coach => "coach",
            ParticipantRole::Student => "student",
        }
    }
}

/// A seat holder as the coordinator sees it.
///
/// `id` keys the seat; `display_name` is only a label, so two users who
/// pick the same name still hold separate seats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub display_name: String,
}

impl Member {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }

    /// Member with a fresh random id, one per `ClassSession` join.
    #[must_use]
    pub fn with_random_id(display_name: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), display_name)
    }
}

/// A bare name is both key and label.
impl From<&str> for Member {
    fn from(name: &str) -> Self {
        Self::new(name, name)
    }
}

/// Session lifecycle status. Transitions are monotonic:
/// `Waiting -> Active -> Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created by a coach, not started.
    Waiting,
    /// Coach is in the session; students may join.
    Active,
    /// Terminal.
    Ended,
}

impl SessionStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Waiting => "waiting",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
        }
    }

    /// Whether moving to `next` keeps the lifecycle monotonic.
    ///
    /// Re-asserting the current status is allowed.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        next >= *self
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection quality reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    #[default]
    Unknown,
    Good,
    Fair,
    Poor,
}

/// A participant in the canonical participant map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Provider-assigned participant id.
    pub id: String,
    /// Display name.
    pub display_name: String,
    /// Coach or student.
    pub role: ParticipantRole,
    /// Whether video is on.
    pub video_on: bool,
    /// Whether audio is on.
    pub audio_on: bool,
    /// Whether this participant is the current active speaker.
    pub is_active_speaker: bool,
    /// Last reported connection quality.
    pub connection_quality: ConnectionQuality,
}

impl Participant {
    /// Create a participant with media off and unknown quality.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, role: ParticipantRole) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            role,
            video_on: false,
            audio_on: false,
            is_active_speaker: false,
            connection_quality: ConnectionQuality::Unknown,
        }
    }
}

/// Registry entry for one class session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Topic-derived session id.
    pub id: SessionId,
    /// Topic as entered by the coach.
    pub topic: String,
    /// Name of the coach who created the session.
    pub coach_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Current participant count.
    pub participant_count: u32,
    /// Capacity.
    pub max_participants: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set when the session ends.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Private sessions are hidden from default discovery listings.
    #[serde(default)]
    pub is_private: bool,
}

impl SessionMetadata {
    /// Create a `waiting` session with no participants.
    #[must_use]
    pub fn new(id: SessionId, topic: impl Into<String>, coach_id: impl Into<String>, max_participants: u32) -> Self {
        Self {
            id,
            topic: topic.into(),
            coach_id: coach_id.into(),
            status: SessionStatus::Waiting,
            participant_count: 0,
            max_participants,
            created_at: Utc::now(),
            ended_at: None,
            is_private: false,
        }
    }

    /// Whether the session has no free slot.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.participant_count >= self.max_participants
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_normalizes_topic() {
        assert_eq!(SessionId::from_topic("Yoga 101").unwrap().as_str(), "yoga-101");
        assert_eq!(
            SessionId::from_topic("  Morning   Flow!! ").unwrap().as_str(),
            "morning-flow"
        );
        assert_eq!(SessionId::from_topic("--HIIT__class--").unwrap().as_str(), "hiit-class");
    }

    #[test]
    fn test_session_id_is_idempotent() {
        let first = SessionId::from_topic("Pilates: Core & Balance").unwrap();
        let second = SessionId::from_topic(first.as_str()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_session_id_rejects_empty_and_long_topics() {
        assert!(matches!(SessionId::from_topic(""), Err(CcError::InvalidTopic(_))));
        assert!(matches!(SessionId::from_topic(" -- !! "), Err(CcError::InvalidTopic(_))));

        let long_topic = "a".repeat(MAX_TOPIC_LENGTH + 1);
        assert!(matches!(
            SessionId::from_topic(&long_topic),
            Err(CcError::InvalidTopic(_))
        ));
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(SessionStatus::Waiting.can_transition_to(SessionStatus::Active));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Ended));
        assert!(SessionStatus::Waiting.can_transition_to(SessionStatus::Ended));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Ended.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Active.can_transition_to(SessionStatus::Waiting));
    }

    #[test]
    fn test_members_with_same_name_get_distinct_ids() {
        let first = Member::with_random_id("Ana");
        let second = Member::with_random_id("Ana");
        assert_eq!(first.display_name, second.display_name);
        assert_ne!(first.id, second.id);

        assert_eq!(Member::from("coach"), Member::new("coach", "coach"));
    }

    #[test]
    fn test_metadata_serde_uses_lowercase_status() {
        let metadata = SessionMetadata::new(
            SessionId::from_topic("yoga").unwrap(),
            "Yoga",
            "bob",
            10,
        );
        let json = serde_json::to_string(&metadata).unwrap();
        assert!(json.contains("\"status\":\"waiting\""));

        let parsed: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, metadata);
    }
}
