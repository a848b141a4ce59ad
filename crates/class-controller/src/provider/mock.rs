//! Mock video SDK and factory.
//!
//! Scriptable stand-ins for the vendor SDKs: a settable live roster,
//! injected vendor events, per-operation failure switches, delays and
//! call counters. Used by unit tests here and by `cc-test-utils`.

use super::{
    ProviderEvent, ProviderFactory, ProviderKind, RosterEntry, SubscriptionQuality,
    VideoProviderSdk,
};
use crate::errors::CcError;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffer for injected vendor events.
const MOCK_EVENT_BUFFER: usize = 256;

#[derive(Debug, Default)]
struct MockState {
    roster: Vec<RosterEntry>,
    event_tx: Option<mpsc::Sender<ProviderEvent>>,
    subscriptions: HashMap<String, SubscriptionQuality>,
    roster_delay: Option<Duration>,
    leave_delay: Option<Duration>,
    last_join_topic: Option<String>,
}

/// Mock vendor SDK.
#[derive(Debug)]
pub struct MockVideoSdk {
    kind: ProviderKind,
    self_id: String,
    state: Mutex<MockState>,
    fail_initialize: AtomicBool,
    fail_join: AtomicBool,
    fail_leave: AtomicBool,
    fail_roster: AtomicBool,
    initialize_calls: AtomicUsize,
    join_calls: AtomicUsize,
    leave_calls: AtomicUsize,
    roster_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
}

impl MockVideoSdk {
    /// Mock whose local participant id is `self-{kind}`.
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_self_id(kind, format!("self-{}", kind.as_str()))
    }

    /// Mock with an explicit local participant id.
    #[must_use]
    pub fn with_self_id(kind: ProviderKind, self_id: impl Into<String>) -> Self {
        Self {
            kind,
            self_id: self_id.into(),
            state: Mutex::new(MockState::default()),
            fail_initialize: AtomicBool::new(false),
            fail_join: AtomicBool::new(false),
            fail_leave: AtomicBool::new(false),
            fail_roster: AtomicBool::new(false),
            initialize_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
            leave_calls: AtomicUsize::new(0),
            roster_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Provider kind this mock stands in for.
    #[must_use]
    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Local participant id returned by `join`.
    #[must_use]
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Replace the live roster.
    pub fn set_roster(&self, roster: Vec<RosterEntry>) {
        self.state().roster = roster;
    }

    /// Add or replace one roster entry.
    pub fn upsert_roster_entry(&self, entry: RosterEntry) {
        let mut state = self.state();
        state.roster.retain(|e| e.id != entry.id);
        state.roster.push(entry);
    }

    /// Drop one roster entry.
    pub fn remove_roster_entry(&self, id: &str) {
        self.state().roster.retain(|e| e.id != id);
    }

    /// Current live roster.
    #[must_use]
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.state().roster.clone()
    }

    /// Inject a vendor event. Returns `false` if nobody holds the stream.
    pub async fn emit(&self, kind: &str, payload: serde_json::Value) -> bool {
        let sender = self.state().event_tx.clone();
        match sender {
            Some(tx) => tx.send(ProviderEvent::new(kind, payload)).await.is_ok(),
            None => false,
        }
    }

    /// Make `initialize` fail.
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Make `join` fail.
    pub fn set_fail_join(&self, fail: bool) {
        self.fail_join.store(fail, Ordering::SeqCst);
    }

    /// Make `leave` fail.
    pub fn set_fail_leave(&self, fail: bool) {
        self.fail_leave.store(fail, Ordering::SeqCst);
    }

    /// Make `get_roster` fail.
    pub fn set_fail_roster(&self, fail: bool) {
        self.fail_roster.store(fail, Ordering::SeqCst);
    }

    /// Delay every roster query.
    pub fn set_roster_delay(&self, delay: Duration) {
        self.state().roster_delay = Some(delay);
    }

    /// Delay every leave.
    pub fn set_leave_delay(&self, delay: Duration) {
        self.state().leave_delay = Some(delay);
    }

    /// Currently subscribed participant ids, sorted.
    #[must_use]
    pub fn subscribed(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state().subscriptions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Quality of a current subscription.
    #[must_use]
    pub fn subscription_quality(&self, participant_id: &str) -> Option<SubscriptionQuality> {
        self.state().subscriptions.get(participant_id).copied()
    }

    /// Topic of the last join.
    #[must_use]
    pub fn last_join_topic(&self) -> Option<String> {
        self.state().last_join_topic.clone()
    }

    #[must_use]
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn leave_calls(&self) -> usize {
        self.leave_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn roster_calls(&self) -> usize {
        self.roster_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl VideoProviderSdk for MockVideoSdk {
    async fn initialize(&self) -> Result<(), CcError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(CcError::ProviderInitFailed(format!(
                "mock {} SDK failed to load",
                self.kind
            )));
        }
        Ok(())
    }

    async fn join(
        &self,
        topic: &str,
        _credential: &SecretString,
        display_name: &str,
    ) -> Result<String, CcError> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_join.load(Ordering::SeqCst) {
            return Err(CcError::ProviderJoinFailed(format!(
                "mock {} SDK rejected the join",
                self.kind
            )));
        }

        let mut state = self.state();
        state.last_join_topic = Some(topic.to_string());
        if !state.roster.iter().any(|e| e.id == self.self_id) {
            state
                .roster
                .push(RosterEntry::new(self.self_id.clone(), display_name));
        }
        Ok(self.self_id.clone())
    }

    async fn leave(&self) -> Result<(), CcError> {
        self.leave_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().leave_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(CcError::Internal(format!("mock {} SDK leave failed", self.kind)));
        }
        let mut state = self.state();
        state.subscriptions.clear();
        let self_id = self.self_id.clone();
        state.roster.retain(|e| e.id != self_id);
        Ok(())
    }

    async fn get_roster(&self) -> Result<Vec<RosterEntry>, CcError> {
        self.roster_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().roster_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_roster.load(Ordering::SeqCst) {
            return Err(CcError::ReconciliationQueryFailed(format!(
                "mock {} roster unavailable",
                self.kind
            )));
        }
        Ok(self.roster())
    }

    async fn subscribe(
        &self,
        participant_id: &str,
        quality: SubscriptionQuality,
    ) -> Result<(), CcError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state()
            .subscriptions
            .insert(participant_id.to_string(), quality);
        Ok(())
    }

    async fn unsubscribe(&self, participant_id: &str) -> Result<(), CcError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.state().subscriptions.remove(participant_id);
        Ok(())
    }

    fn take_events(&self) -> Option<mpsc::Receiver<ProviderEvent>> {
        let (tx, rx) = mpsc::channel(MOCK_EVENT_BUFFER);
        self.state().event_tx = Some(tx);
        Some(rx)
    }
}

/// Mock factory handing out one shared [`MockVideoSdk`] per kind.
#[derive(Debug, Default)]
pub struct MockProviderFactory {
    sdks: Mutex<HashMap<ProviderKind, Arc<MockVideoSdk>>>,
    failing: Mutex<Vec<ProviderKind>>,
    create_calls: AtomicUsize,
}

impl MockProviderFactory {
    /// Factory that creates mocks on demand.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-register the mock returned for `kind`.
    #[must_use]
    pub fn with_sdk(self, sdk: Arc<MockVideoSdk>) -> Self {
        self.sdks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(sdk.kind(), sdk);
        self
    }

    /// Make `create(kind)` fail.
    pub fn fail_kind(&self, kind: ProviderKind) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);
    }

    /// The mock handed out for `kind`, creating it if needed.
    #[must_use]
    pub fn sdk(&self, kind: ProviderKind) -> Arc<MockVideoSdk> {
        let mut sdks = self.sdks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            sdks.entry(kind)
                .or_insert_with(|| Arc::new(MockVideoSdk::new(kind))),
        )
    }

    /// Number of `create` calls.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

impl ProviderFactory for MockProviderFactory {
    fn create(&self, kind: ProviderKind) -> Result<Arc<dyn VideoProviderSdk>, CcError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&kind);
        if failing {
            return Err(CcError::ProviderInitFailed(format!("no {kind} SDK available")));
        }
        let sdk: Arc<dyn VideoProviderSdk> = self.sdk(kind);
        Ok(sdk)
    }
}
