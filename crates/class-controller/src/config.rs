//! Class controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use crate::actors::coordinator::{CoordinatorConfig, DEFAULT_MAX_PARTICIPANTS};
use crate::actors::session::SessionActorConfig;
use crate::pagination::{PageSizes, DEFAULT_DESKTOP_PAGE_SIZE, DEFAULT_MOBILE_PAGE_SIZE};
use crate::provider::{ProviderKind, RenderingStrategy};
use crate::tasks::RegistryCleanupConfig;

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default reconciliation interval in milliseconds.
pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 3000;

/// Default roster query timeout in milliseconds.
pub const DEFAULT_ROSTER_QUERY_TIMEOUT_MS: u64 = 2000;

/// Default grace delay before an ended session is evicted.
pub const DEFAULT_SESSION_EVICTION_DELAY_SECONDS: u64 = 5;

/// Default registry sweep interval.
pub const DEFAULT_REGISTRY_CLEANUP_INTERVAL_SECONDS: u64 = 600;

/// Default maximum registry entry age.
pub const DEFAULT_REGISTRY_MAX_AGE_SECONDS: u64 = 7200;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "cc";

/// Class controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Unique identifier for this instance.
    pub instance_id: String,

    /// Health endpoint bind address (default: "0.0.0.0:8090").
    pub health_bind_address: String,

    /// Redis connection URL for the session registry. In-memory when unset.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    pub reconcile_interval_ms: u64,

    pub roster_query_timeout_ms: u64,

    pub session_eviction_delay_seconds: u64,

    pub registry_cleanup_interval_seconds: u64,

    pub registry_max_age_seconds: u64,

    /// Capacity for newly created sessions.
    pub max_participants: u32,

    pub desktop_page_size: usize,

    pub mobile_page_size: usize,

    pub primary_provider: ProviderKind,

    /// Provider to switch to when the primary fails.
    pub fallback_provider: Option<ProviderKind>,

    pub rendering_strategy: RenderingStrategy,

    /// Query the roster on join events to seed media flags.
    pub sync_media_on_join: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("instance_id", &self.instance_id)
            .field("health_bind_address", &self.health_bind_address)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("reconcile_interval_ms", &self.reconcile_interval_ms)
            .field("roster_query_timeout_ms", &self.roster_query_timeout_ms)
            .field(
                "session_eviction_delay_seconds",
                &self.session_eviction_delay_seconds,
            )
            .field(
                "registry_cleanup_interval_seconds",
                &self.registry_cleanup_interval_seconds,
            )
            .field("registry_max_age_seconds", &self.registry_max_age_seconds)
            .field("max_participants", &self.max_participants)
            .field("desktop_page_size", &self.desktop_page_size)
            .field("mobile_page_size", &self.mobile_page_size)
            .field("primary_provider", &self.primary_provider)
            .field("fallback_provider", &self.fallback_provider)
            .field("rendering_strategy", &self.rendering_strategy)
            .field("sync_media_on_join", &self.sync_media_on_join)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: generate_instance_id(),
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            redis_url: None,
            reconcile_interval_ms: DEFAULT_RECONCILE_INTERVAL_MS,
            roster_query_timeout_ms: DEFAULT_ROSTER_QUERY_TIMEOUT_MS,
            session_eviction_delay_seconds: DEFAULT_SESSION_EVICTION_DELAY_SECONDS,
            registry_cleanup_interval_seconds: DEFAULT_REGISTRY_CLEANUP_INTERVAL_SECONDS,
            registry_max_age_seconds: DEFAULT_REGISTRY_MAX_AGE_SECONDS,
            max_participants: DEFAULT_MAX_PARTICIPANTS,
            desktop_page_size: DEFAULT_DESKTOP_PAGE_SIZE,
            mobile_page_size: DEFAULT_MOBILE_PAGE_SIZE,
            primary_provider: ProviderKind::Zoom,
            fallback_provider: None,
            rendering_strategy: RenderingStrategy::default(),
            sync_media_on_join: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let instance_id = vars
            .get("CC_INSTANCE_ID")
            .cloned()
            .unwrap_or(defaults.instance_id);

        let health_bind_address = vars
            .get("CC_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or(defaults.health_bind_address);

        let redis_url = vars
            .get("REDIS_URL")
            .filter(|url| !url.trim().is_empty())
            .map(|url| SecretString::from(url.clone()));

        let reconcile_interval_ms = positive(
            "CC_RECONCILE_INTERVAL_MS",
            parse_or(vars, "CC_RECONCILE_INTERVAL_MS", DEFAULT_RECONCILE_INTERVAL_MS)?,
        )?;
        let roster_query_timeout_ms = positive(
            "CC_ROSTER_QUERY_TIMEOUT_MS",
            parse_or(vars, "CC_ROSTER_QUERY_TIMEOUT_MS", DEFAULT_ROSTER_QUERY_TIMEOUT_MS)?,
        )?;
        let session_eviction_delay_seconds = parse_or(
            vars,
            "CC_SESSION_EVICTION_DELAY_SECONDS",
            DEFAULT_SESSION_EVICTION_DELAY_SECONDS,
        )?;
        let registry_cleanup_interval_seconds = positive(
            "CC_REGISTRY_CLEANUP_INTERVAL_SECONDS",
            parse_or(
                vars,
                "CC_REGISTRY_CLEANUP_INTERVAL_SECONDS",
                DEFAULT_REGISTRY_CLEANUP_INTERVAL_SECONDS,
            )?,
        )?;
        let registry_max_age_seconds =
            parse_or(vars, "CC_REGISTRY_MAX_AGE_SECONDS", DEFAULT_REGISTRY_MAX_AGE_SECONDS)?;

        let max_participants = parse_or(vars, "CC_MAX_PARTICIPANTS", DEFAULT_MAX_PARTICIPANTS)?;
        if max_participants == 0 {
            return Err(ConfigError::InvalidValue(
                "CC_MAX_PARTICIPANTS must be at least 1".to_string(),
            ));
        }

        // One tile is always left for the rotating window.
        let desktop_page_size = parse_or(vars, "CC_DESKTOP_PAGE_SIZE", DEFAULT_DESKTOP_PAGE_SIZE)?;
        let mobile_page_size = parse_or(vars, "CC_MOBILE_PAGE_SIZE", DEFAULT_MOBILE_PAGE_SIZE)?;
        for (name, size) in [
            ("CC_DESKTOP_PAGE_SIZE", desktop_page_size),
            ("CC_MOBILE_PAGE_SIZE", mobile_page_size),
        ] {
            if size < 2 {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at least 2, got {size}"
                )));
            }
        }

        let primary_provider = parse_or(vars, "CC_PRIMARY_PROVIDER", defaults.primary_provider)?;
        let fallback_provider = match vars.get("CC_FALLBACK_PROVIDER") {
            Some(raw) if !raw.trim().is_empty() => Some(parse_value("CC_FALLBACK_PROVIDER", raw)?),
            _ => None,
        };
        if fallback_provider == Some(primary_provider) {
            return Err(ConfigError::InvalidValue(
                "CC_FALLBACK_PROVIDER must differ from CC_PRIMARY_PROVIDER".to_string(),
            ));
        }

        let rendering_strategy =
            parse_or(vars, "CC_RENDERING_STRATEGY", defaults.rendering_strategy)?;
        let sync_media_on_join = parse_or(vars, "CC_SYNC_MEDIA_ON_JOIN", true)?;

        Ok(Config {
            instance_id,
            health_bind_address,
            redis_url,
            reconcile_interval_ms,
            roster_query_timeout_ms,
            session_eviction_delay_seconds,
            registry_cleanup_interval_seconds,
            registry_max_age_seconds,
            max_participants,
            desktop_page_size,
            mobile_page_size,
            primary_provider,
            fallback_provider,
            rendering_strategy,
            sync_media_on_join,
        })
    }

    /// Session actor tuning derived from this config.
    #[must_use]
    pub fn session_actor_config(&self) -> SessionActorConfig {
        SessionActorConfig {
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
            roster_query_timeout: Duration::from_millis(self.roster_query_timeout_ms),
            sync_media_on_join: self.sync_media_on_join,
        }
    }

    #[must_use]
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_participants: self.max_participants,
            eviction_delay: Duration::from_secs(self.session_eviction_delay_seconds),
        }
    }

    #[must_use]
    pub fn registry_cleanup_config(&self) -> RegistryCleanupConfig {
        RegistryCleanupConfig {
            interval: Duration::from_secs(self.registry_cleanup_interval_seconds),
            max_age: Duration::from_secs(self.registry_max_age_seconds),
        }
    }

    #[must_use]
    pub fn page_sizes(&self) -> PageSizes {
        PageSizes {
            desktop: self.desktop_page_size,
            mobile: self.mobile_page_size,
        }
    }
}

fn generate_instance_id() -> String {
    format!("{}-{}", DEFAULT_INSTANCE_ID_PREFIX, uuid::Uuid::new_v4())
}

fn parse_value<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue(format!("{name}={raw:?}: {e}")))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match vars.get(name) {
        Some(raw) => parse_value(name, raw),
        None => Ok(default),
    }
}

fn positive(name: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{name} must be positive")));
    }
    Ok(value)
}
