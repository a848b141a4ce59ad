//! Video transport providers.
//!
//! The vendor SDK is a black box behind [`VideoProviderSdk`]. One
//! [`VideoProviderAdapter`] per provider kind wraps it with the session
//! actor, and [`VideoServiceProvider`] owns the primary/fallback slots.
//!
//! # Modules
//!
//! - [`adapter`] - `VideoProviderAdapter`, uniform join/leave over one SDK
//! - [`service`] - `VideoServiceProvider`, lazy construction and switchover
//! - [`mock`] - Scriptable SDK and factory for tests

pub mod adapter;
pub mod mock;
pub mod service;

pub use adapter::{JoinParams, VideoProviderAdapter};
pub use service::VideoServiceProvider;

use crate::errors::CcError;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Interchangeable vendor transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Zoom,
    Agora,
}

impl ProviderKind {
    /// Returns the provider name for logs, config and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Zoom => "zoom",
            ProviderKind::Agora => "agora",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = CcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zoom" => Ok(ProviderKind::Zoom),
            "agora" => Ok(ProviderKind::Agora),
            other => Err(CcError::Config(format!("unknown video provider '{other}'"))),
        }
    }
}

/// How remote video is rendered; caps subscription quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderingStrategy {
    /// One video element per visible participant.
    #[default]
    VideoElement,
    /// All visible participants drawn onto one canvas (mobile SDKs).
    SharedCanvas,
}

impl RenderingStrategy {
    /// Returns the strategy name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RenderingStrategy::VideoElement => "video-element",
            RenderingStrategy::SharedCanvas => "shared-canvas",
        }
    }

    /// Highest quality this strategy can render.
    #[must_use]
    pub const fn max_quality(&self) -> SubscriptionQuality {
        match self {
            RenderingStrategy::VideoElement => SubscriptionQuality::High,
            RenderingStrategy::SharedCanvas => SubscriptionQuality::Medium,
        }
    }
}

impl FromStr for RenderingStrategy {
    type Err = CcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "video-element" => Ok(RenderingStrategy::VideoElement),
            "shared-canvas" => Ok(RenderingStrategy::SharedCanvas),
            other => Err(CcError::Config(format!("unknown rendering strategy '{other}'"))),
        }
    }
}

/// Requested remote video quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionQuality {
    Low,
    Medium,
    High,
}

impl SubscriptionQuality {
    /// Quality for a page showing `visible` tiles: up to 4 high, up to 9
    /// medium, otherwise low.
    #[must_use]
    pub fn for_visible_count(visible: usize) -> Self {
        match visible {
            0..=4 => SubscriptionQuality::High,
            5..=9 => SubscriptionQuality::Medium,
            _ => SubscriptionQuality::Low,
        }
    }

    /// Clamp to what the rendering strategy supports.
    #[must_use]
    pub fn capped_by(self, strategy: RenderingStrategy) -> Self {
        self.min(strategy.max_quality())
    }
}

/// One entry of the provider's live roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub video_on: bool,
    #[serde(default)]
    pub audio_on: bool,
    /// Vendor host flag; hosts are coaches.
    #[serde(default)]
    pub is_host: bool,
}

impl RosterEntry {
    /// Roster entry with media off.
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            video_on: false,
            audio_on: false,
            is_host: false,
        }
    }
}

/// Canonical event kinds the reconciler understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventKind {
    Joined,
    Left,
    Updated,
    VideoOn,
    VideoOff,
    AudioOn,
    AudioOff,
    ActiveSpeaker,
    ConnectionChange,
}

impl ProviderEventKind {
    /// Map a vendor event name onto a canonical kind.
    ///
    /// Returns `None` for events the reconciler ignores.
    #[must_use]
    pub fn from_vendor(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('_', "-");
        let kind = match normalized.as_str() {
            "joined" | "user-added" | "user-joined" | "participant-joined" => Self::Joined,
            "left" | "user-removed" | "user-left" | "participant-left" => Self::Left,
            "updated" | "user-updated" | "participant-updated" => Self::Updated,
            "video-on" | "video-started" | "peer-video-on" => Self::VideoOn,
            "video-off" | "video-stopped" | "peer-video-off" => Self::VideoOff,
            "audio-on" | "unmuted" | "audio-unmuted" => Self::AudioOn,
            "audio-off" | "muted" | "audio-muted" => Self::AudioOff,
            "active-speaker" | "active-speaker-changed" => Self::ActiveSpeaker,
            "connection-change" | "network-quality" | "connection-quality" => {
                Self::ConnectionChange
            }
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical name, used as the `kind` metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Joined => "joined",
            Self::Left => "left",
            Self::Updated => "updated",
            Self::VideoOn => "video-on",
            Self::VideoOff => "video-off",
            Self::AudioOn => "audio-on",
            Self::AudioOff => "audio-off",
            Self::ActiveSpeaker => "active-speaker",
            Self::ConnectionChange => "connection-change",
        }
    }
}

/// Raw event from the vendor SDK.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEvent {
    /// Vendor event name.
    pub kind: String,
    /// Vendor payload, in whatever shape this SDK version uses.
    pub payload: serde_json::Value,
}

impl ProviderEvent {
    /// Build an event.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// Vendor video SDK operations (enables mocking).
#[async_trait::async_trait]
pub trait VideoProviderSdk: Send + Sync {
    /// Load and initialize the SDK.
    async fn initialize(&self) -> Result<(), CcError>;

    /// Join the vendor session for `topic`; returns the local participant id.
    async fn join(
        &self,
        topic: &str,
        credential: &SecretString,
        display_name: &str,
    ) -> Result<String, CcError>;

    /// Leave the vendor session.
    async fn leave(&self) -> Result<(), CcError>;

    /// Query the live roster (ground truth).
    async fn get_roster(&self) -> Result<Vec<RosterEntry>, CcError>;

    /// Start receiving a participant's video.
    async fn subscribe(&self, participant_id: &str, quality: SubscriptionQuality)
        -> Result<(), CcError>;

    /// Stop receiving a participant's video.
    async fn unsubscribe(&self, participant_id: &str) -> Result<(), CcError>;

    /// Event stream for the current join.
    ///
    /// Called once after every successful `join`, including rejoins after a
    /// switchover; each call hands out a fresh stream and earlier receivers
    /// stop getting events. `None` if the SDK has no event stream.
    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>>;
}

/// Constructs SDK instances per provider kind.
pub trait ProviderFactory: Send + Sync {
    /// Create a fresh SDK instance.
    fn create(&self, kind: ProviderKind) -> Result<Arc<dyn VideoProviderSdk>, CcError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("zoom".parse::<ProviderKind>().unwrap(), ProviderKind::Zoom);
        assert_eq!(" Agora ".parse::<ProviderKind>().unwrap(), ProviderKind::Agora);
        assert!(matches!(
            "webex".parse::<ProviderKind>(),
            Err(CcError::Config(_))
        ));
    }

    #[test]
    fn test_rendering_strategy_parsing() {
        assert_eq!(
            "shared-canvas".parse::<RenderingStrategy>().unwrap(),
            RenderingStrategy::SharedCanvas
        );
        assert!("canvas".parse::<RenderingStrategy>().is_err());
    }

    #[test]
    fn test_quality_for_visible_count() {
        assert_eq!(SubscriptionQuality::for_visible_count(1), SubscriptionQuality::High);
        assert_eq!(SubscriptionQuality::for_visible_count(4), SubscriptionQuality::High);
        assert_eq!(SubscriptionQuality::for_visible_count(5), SubscriptionQuality::Medium);
        assert_eq!(SubscriptionQuality::for_visible_count(9), SubscriptionQuality::Medium);
        assert_eq!(SubscriptionQuality::for_visible_count(25), SubscriptionQuality::Low);
    }

    #[test]
    fn test_quality_capped_by_strategy() {
        assert_eq!(
            SubscriptionQuality::High.capped_by(RenderingStrategy::SharedCanvas),
            SubscriptionQuality::Medium
        );
        assert_eq!(
            SubscriptionQuality::High.capped_by(RenderingStrategy::VideoElement),
            SubscriptionQuality::High
        );
        assert_eq!(
            SubscriptionQuality::Low.capped_by(RenderingStrategy::SharedCanvas),
            SubscriptionQuality::Low
        );
    }

    #[test]
    fn test_vendor_event_aliases() {
        assert_eq!(
            ProviderEventKind::from_vendor("user-added"),
            Some(ProviderEventKind::Joined)
        );
        assert_eq!(
            ProviderEventKind::from_vendor("USER_REMOVED"),
            Some(ProviderEventKind::Left)
        );
        assert_eq!(
            ProviderEventKind::from_vendor("active-speaker"),
            Some(ProviderEventKind::ActiveSpeaker)
        );
        assert_eq!(ProviderEventKind::from_vendor("chat-message"), None);
    }
}
