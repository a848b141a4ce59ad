//! Pre-configured test data fixtures for class controller testing.
//!
//! Provides builders for:
//! - Join requests
//! - Provider rosters and vendor event payloads
//! - A started runtime wired to mock providers (`TestClass`)

use class_controller::config::Config;
use class_controller::discovery::{KeyValueStore, SessionDiscoveryService};
use class_controller::pagination::DeviceClass;
use class_controller::provider::mock::{MockProviderFactory, MockVideoSdk};
use class_controller::provider::{ProviderFactory, ProviderKind, RosterEntry};
use class_controller::types::ParticipantRole;
use class_controller::{CcError, ClassRuntime, ClassSession, JoinRequest};
use secrecy::SecretString;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Join request with a throwaway credential.
#[must_use]
pub fn join_request(topic: &str, name: &str, role: ParticipantRole) -> JoinRequest {
    JoinRequest {
        topic: topic.to_string(),
        display_name: name.to_string(),
        role,
        credential: SecretString::from(format!("test-token-{name}")),
        device_class: DeviceClass::Desktop,
    }
}

/// Roster from `(id, display_name)` pairs, media off.
#[must_use]
pub fn roster(entries: &[(&str, &str)]) -> Vec<RosterEntry> {
    entries
        .iter()
        .map(|(id, name)| RosterEntry::new(*id, *name))
        .collect()
}

/// Roster entry flagged as the session host.
#[must_use]
pub fn host_entry(id: &str, name: &str) -> RosterEntry {
    let mut entry = RosterEntry::new(id, name);
    entry.is_host = true;
    entry
}

/// Roster entry with camera and microphone on.
#[must_use]
pub fn live_entry(id: &str, name: &str) -> RosterEntry {
    let mut entry = RosterEntry::new(id, name);
    entry.video_on = true;
    entry.audio_on = true;
    entry
}

/// `{"users": [{"userId", "displayName"}, ...]}` payload.
#[must_use]
pub fn users_payload(users: &[(&str, &str)]) -> Value {
    let users: Vec<Value> = users
        .iter()
        .map(|(id, name)| json!({"userId": id, "displayName": name}))
        .collect();
    json!({ "users": users })
}

/// Single-user payload.
#[must_use]
pub fn user_payload(id: &str) -> Value {
    json!({ "userId": id })
}

/// Active speaker payload; `None` clears the speaker.
#[must_use]
pub fn speaker_payload(id: Option<&str>) -> Value {
    match id {
        Some(id) => json!({ "userId": id }),
        None => Value::Null,
    }
}

/// Builder for a started runtime on mock providers.
#[derive(Clone)]
pub struct TestClass {
    /// Class topic.
    pub topic: String,
    config: Config,
    store: Option<Arc<dyn KeyValueStore>>,
}

impl Default for TestClass {
    fn default() -> Self {
        Self::new()
    }
}

impl TestClass {
    /// Class with a random topic and default settings.
    #[must_use]
    pub fn new() -> Self {
        let mut config = Config::default();
        config.instance_id = "cc-test".to_string();
        Self {
            topic: format!("Class {}", Uuid::new_v4()),
            config,
            store: None,
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    #[must_use]
    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.config.max_participants = max;
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, kind: ProviderKind) -> Self {
        self.config.fallback_provider = Some(kind);
        self
    }

    /// Same page size for every device class.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.config.desktop_page_size = size;
        self.config.mobile_page_size = size;
        self
    }

    #[must_use]
    pub fn with_reconcile_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.reconcile_interval_ms = interval_ms;
        self
    }

    #[must_use]
    pub fn with_eviction_delay_seconds(mut self, seconds: u64) -> Self {
        self.config.session_eviction_delay_seconds = seconds;
        self
    }

    #[must_use]
    pub fn without_media_sync(mut self) -> Self {
        self.config.sync_media_on_join = false;
        self
    }

    /// Use a specific registry store instead of a fresh in-memory one.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The config the runtime will be started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start the runtime. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(self) -> RunningClass {
        let discovery = match self.store {
            Some(store) => SessionDiscoveryService::new(store),
            None => SessionDiscoveryService::in_memory(),
        };
        let factory = Arc::new(MockProviderFactory::new());
        let runtime = ClassRuntime::start(self.config, discovery, Arc::clone(&factory) as Arc<dyn ProviderFactory>);
        RunningClass {
            topic: self.topic,
            runtime,
            factory,
        }
    }
}

/// A started runtime plus handles to its mock providers.
pub struct RunningClass {
    pub topic: String,
    pub runtime: ClassRuntime,
    pub factory: Arc<MockProviderFactory>,
}

impl RunningClass {
    /// New session joined to this class's topic.
    pub async fn join(&self, role: ParticipantRole, name: &str) -> Result<ClassSession, CcError> {
        let session = self.runtime.new_session();
        session.join(join_request(&self.topic, name, role)).await?;
        Ok(session)
    }

    /// Mock SDK for a provider kind (shared by every session).
    #[must_use]
    pub fn sdk(&self, kind: ProviderKind) -> Arc<MockVideoSdk> {
        self.factory.sdk(kind)
    }

    /// Mock SDK for the configured primary provider.
    #[must_use]
    pub fn primary_sdk(&self) -> Arc<MockVideoSdk> {
        self.sdk(self.runtime.config().primary_provider)
    }
}
