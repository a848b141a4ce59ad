//! Registry store with failure injection.
//!
//! Wraps the in-memory store and fails every operation while the switch
//! is on, so tests can check that registry outages never fail joins.

use async_trait::async_trait;
use class_controller::discovery::{InMemoryStore, KeyValueStore};
use class_controller::CcError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory store that can be switched into failure mode.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    failures: AtomicUsize,
}

impl FlakyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail (or stop failing) every operation.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of operations rejected so far.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Number of stored keys, bypassing failure mode.
    pub async fn len(&self) -> usize {
        self.inner.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.is_empty().await
    }

    fn check(&self) -> Result<(), CcError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CcError::Store("injected store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CcError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CcError> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), CcError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CcError> {
        self.check()?;
        self.inner.list_keys(prefix).await
    }
}
