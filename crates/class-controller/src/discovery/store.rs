//! Key-value persistence for the session registry.
//!
//! # Key Patterns
//!
//! - `class:session:{session_id}` - Session metadata (JSON)
//! - `class:user:{user_id}` - Session id the user is bound to
//!
//! # Connection Pattern
//!
//! The redis-rs `MultiplexedConnection` is cheap to clone and safe to use
//! concurrently, so each operation clones it instead of locking.

use crate::errors::CcError;
use crate::observability::metrics::record_store_latency;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{error, instrument, warn};

/// Registry persistence operations (enables mocking).
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, CcError>;

    /// Write a value.
    async fn set(&self, key: &str, value: &str) -> Result<(), CcError>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CcError>;

    /// All keys starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CcError>;
}

/// Process-local store, used in tests and when no Redis is configured.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CcError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CcError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CcError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CcError> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Redis-backed store.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `CcError::Store` if the client cannot be opened or connected.
    pub async fn connect(redis_url: &SecretString) -> Result<Self, CcError> {
        // The URL may carry credentials; it is never logged.
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            error!(target: "cc.discovery.redis", error = %e, "Failed to open Redis client");
            CcError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "cc.discovery.redis", error = %e, "Failed to connect to Redis");
                CcError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

#[async_trait::async_trait]
impl KeyValueStore for RedisStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>, CcError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let value: Option<String> = conn.get(key).await.map_err(|e| {
            warn!(target: "cc.discovery.redis", error = %e, key = %key, "Redis GET failed");
            CcError::Store(format!("Failed to get key: {e}"))
        })?;
        record_store_latency("get", started.elapsed());
        Ok(value)
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn set(&self, key: &str, value: &str) -> Result<(), CcError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        conn.set::<_, _, ()>(key, value).await.map_err(|e| {
            warn!(target: "cc.discovery.redis", error = %e, key = %key, "Redis SET failed");
            CcError::Store(format!("Failed to set key: {e}"))
        })?;
        record_store_latency("set", started.elapsed());
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn delete(&self, key: &str) -> Result<(), CcError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        conn.del::<_, ()>(key).await.map_err(|e| {
            warn!(target: "cc.discovery.redis", error = %e, key = %key, "Redis DEL failed");
            CcError::Store(format!("Failed to delete key: {e}"))
        })?;
        record_store_latency("delete", started.elapsed());
        Ok(())
    }

    #[instrument(skip_all, fields(prefix = %prefix))]
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, CcError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let pattern = format!("{prefix}*");

        let mut keys = Vec::new();
        {
            let mut iter = conn.scan_match::<_, String>(&pattern).await.map_err(|e| {
                warn!(target: "cc.discovery.redis", error = %e, "Redis SCAN failed");
                CcError::Store(format!("Failed to scan keys: {e}"))
            })?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();
        keys.dedup();

        record_store_latency("list_keys", started.elapsed());
        Ok(keys)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_store_crud() {
        let store = InMemoryStore::new();
        assert!(store.is_empty().await);

        store.set("class:session:yoga", "{}").await.unwrap();
        assert_eq!(store.get("class:session:yoga").await.unwrap().as_deref(), Some("{}"));

        store.delete("class:session:yoga").await.unwrap();
        assert!(store.get("class:session:yoga").await.unwrap().is_none());

        // Deleting a missing key is fine.
        store.delete("class:session:yoga").await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_list_keys_by_prefix() {
        let store = InMemoryStore::new();
        store.set("class:session:b", "1").await.unwrap();
        store.set("class:session:a", "2").await.unwrap();
        store.set("class:user:alice", "a").await.unwrap();

        assert_eq!(
            store.list_keys("class:session:").await.unwrap(),
            vec!["class:session:a".to_string(), "class:session:b".to_string()]
        );
        assert_eq!(store.len().await, 3);
    }
}
