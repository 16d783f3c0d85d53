//! Client configuration.
//!
//! [`RosterConfig`] is what users write (every field optional); [`RosterConfig::resolve`]
//! fills in defaults and validates, producing the [`ResolvedConfig`] a
//! [`crate::Client`] is built from.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_REGISTRY_NAME: &str = "roster";
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(300);
pub const DEFAULT_STORE_LOCATION: &str = "sqlite://roster.db";
/// Environment variable consulted when no store location is configured.
pub const STORE_LOCATION_ENV: &str = "ROSTER_STORE_LOCATION";

pub const DEFAULT_ACTIVATION_ATTEMPTS: u32 = 10;
pub const DEFAULT_ACTIVATION_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
pub const DEFAULT_ACTIVATION_MAX_BACKOFF: Duration = Duration::from_secs(2);
pub const DEFAULT_ACTIVATION_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "invalid registry name '{0}': use at most {max} ASCII letters, digits, '_', '-' or '.'",
        max = roster_sdk::MAX_REGISTRY_NAME_LEN
    )]
    InvalidRegistryName(String),
    #[error("heartbeat interval {interval:?} must be non-zero and shorter than the TTL {ttl:?}")]
    HeartbeatInterval { interval: Duration, ttl: Duration },
    #[error("activation.max_attempts must be at least 1")]
    ZeroActivationAttempts,
    #[error("unsupported store location '{0}' (expected 'memory' or 'sqlite:...')")]
    UnsupportedStore(String),
}

/// User-facing configuration. Unset fields take their defaults in [`RosterConfig::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RosterConfig {
    /// Registry table name. Empty means default.
    pub registry_name: Option<String>,
    /// Default record TTL in seconds. Zero means default.
    pub ttl_seconds: Option<u64>,
    /// Period between heartbeat writes, e.g. `"300ms"`.
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Option<Duration>,
    /// `memory` or `sqlite:<path>`; falls back to `ROSTER_STORE_LOCATION`, then the default.
    pub store_location: Option<String>,
    /// Check the registry is active before each discovery query.
    pub verify_registry_on_discover: Option<bool>,
    pub activation: ActivationConfig,
}

/// Registry bootstrap polling settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActivationConfig {
    pub max_attempts: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub deadline: Option<Duration>,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub registry_name: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    pub store_location: StoreLocation,
    pub verify_registry_on_discover: bool,
    pub activation: ActivationPolicy,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            registry_name: DEFAULT_REGISTRY_NAME.to_owned(),
            ttl: DEFAULT_TTL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            store_location: StoreLocation::Sqlite(DEFAULT_STORE_LOCATION.to_owned()),
            verify_registry_on_discover: true,
            activation: ActivationPolicy::default(),
        }
    }
}

/// Where the registry store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Process-local store, mostly for tests and single-process setups.
    Memory,
    /// SQLite database URL, e.g. `sqlite://roster.db` or `sqlite::memory:`.
    Sqlite(String),
}

impl FromStr for StoreLocation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "memory" || s == "memory://" {
            Ok(Self::Memory)
        } else if s.starts_with("sqlite:") {
            Ok(Self::Sqlite(s.to_owned()))
        } else {
            Err(ConfigError::UnsupportedStore(s.to_owned()))
        }
    }
}

impl Serialize for StoreLocation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "memory://"),
            Self::Sqlite(url) => write!(f, "{url}"),
        }
    }
}

/// Bounded exponential backoff used while waiting for a new registry to become active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActivationPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
}

impl Default for ActivationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ACTIVATION_ATTEMPTS,
            initial_backoff: DEFAULT_ACTIVATION_INITIAL_BACKOFF,
            max_backoff: DEFAULT_ACTIVATION_MAX_BACKOFF,
            deadline: DEFAULT_ACTIVATION_DEADLINE,
        }
    }
}

impl ActivationPolicy {
    /// Pause after the given failed poll (1-based): `initial * 2^(attempt-1)`, capped.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(2u32.pow(exp))
            .min(self.max_backoff)
    }
}

impl RosterConfig {
    /// Resolves against the process environment.
    ///
    /// # Errors
    /// See [`RosterConfig::resolve_with_env`].
    pub fn resolve(&self) -> Result<ResolvedConfig, ConfigError> {
        self.resolve_with_env(|key| std::env::var(key).ok())
    }

    /// Resolves defaults using `env` for environment lookups.
    ///
    /// Precedence for every field is explicit value, then (store location only)
    /// environment, then built-in default.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid registry name, an unsupported store
    /// location, a heartbeat interval not shorter than the TTL, or zero activation attempts.
    pub fn resolve_with_env<F>(&self, env: F) -> Result<ResolvedConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let registry_name = match self.registry_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => DEFAULT_REGISTRY_NAME.to_owned(),
        };
        if !roster_sdk::is_valid_registry_name(&registry_name) {
            return Err(ConfigError::InvalidRegistryName(registry_name));
        }

        let ttl = match self.ttl_seconds {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => DEFAULT_TTL,
        };

        let heartbeat_interval = self
            .heartbeat_interval
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        if heartbeat_interval.is_zero() || heartbeat_interval >= ttl {
            return Err(ConfigError::HeartbeatInterval {
                interval: heartbeat_interval,
                ttl,
            });
        }

        let store_location = non_empty(self.store_location.clone())
            .or_else(|| non_empty(env(STORE_LOCATION_ENV)))
            .unwrap_or_else(|| DEFAULT_STORE_LOCATION.to_owned())
            .parse()?;

        let defaults = ActivationPolicy::default();
        let activation = ActivationPolicy {
            max_attempts: self.activation.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: self
                .activation
                .initial_backoff
                .unwrap_or(defaults.initial_backoff),
            max_backoff: self.activation.max_backoff.unwrap_or(defaults.max_backoff),
            deadline: self.activation.deadline.unwrap_or(defaults.deadline),
        };
        if activation.max_attempts == 0 {
            return Err(ConfigError::ZeroActivationAttempts);
        }

        Ok(ResolvedConfig {
            registry_name,
            ttl,
            heartbeat_interval,
            store_location,
            verify_registry_on_discover: self.verify_registry_on_discover.unwrap_or(true),
            activation,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_config_resolves_to_defaults() {
        let resolved = RosterConfig::default().resolve_with_env(no_env).unwrap();
        assert_eq!(resolved, ResolvedConfig::default());
    }

    #[test]
    fn zero_ttl_and_blank_name_fall_back_to_defaults() {
        let cfg = RosterConfig {
            registry_name: Some("  ".to_owned()),
            ttl_seconds: Some(0),
            ..Default::default()
        };

        let resolved = cfg.resolve_with_env(no_env).unwrap();
        assert_eq!(resolved.registry_name, DEFAULT_REGISTRY_NAME);
        assert_eq!(resolved.ttl, DEFAULT_TTL);
    }

    #[test]
    fn store_location_prefers_explicit_then_env() {
        let env = |key: &str| (key == STORE_LOCATION_ENV).then(|| "memory".to_owned());

        let from_env = RosterConfig::default().resolve_with_env(env).unwrap();
        assert_eq!(from_env.store_location, StoreLocation::Memory);

        let explicit = RosterConfig {
            store_location: Some("sqlite::memory:".to_owned()),
            ..Default::default()
        };
        let resolved = explicit.resolve_with_env(env).unwrap();
        assert_eq!(
            resolved.store_location,
            StoreLocation::Sqlite("sqlite::memory:".to_owned())
        );
    }

    #[test]
    fn blank_env_value_is_ignored() {
        let env = |_: &str| Some(String::new());
        let resolved = RosterConfig::default().resolve_with_env(env).unwrap();
        assert_eq!(
            resolved.store_location,
            StoreLocation::Sqlite(DEFAULT_STORE_LOCATION.to_owned())
        );
    }

    #[test]
    fn unsupported_store_location_is_rejected() {
        let cfg = RosterConfig {
            store_location: Some("dynamodb://us-west-2".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_with_env(no_env),
            Err(ConfigError::UnsupportedStore(_))
        ));
    }

    #[test]
    fn heartbeat_must_be_shorter_than_ttl() {
        let cfg = RosterConfig {
            ttl_seconds: Some(1),
            heartbeat_interval: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_with_env(no_env),
            Err(ConfigError::HeartbeatInterval { .. })
        ));
    }

    #[test]
    fn registry_name_must_be_an_identifier() {
        let cfg = RosterConfig {
            registry_name: Some("bad name;".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_with_env(no_env),
            Err(ConfigError::InvalidRegistryName(_))
        ));
    }

    #[test]
    fn overlong_registry_name_is_rejected() {
        let cfg = RosterConfig {
            registry_name: Some("r".repeat(roster_sdk::MAX_REGISTRY_NAME_LEN + 1)),
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_with_env(no_env),
            Err(ConfigError::InvalidRegistryName(_))
        ));
    }

    #[test]
    fn zero_activation_attempts_rejected() {
        let cfg = RosterConfig {
            activation: ActivationConfig {
                max_attempts: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            cfg.resolve_with_env(no_env),
            Err(ConfigError::ZeroActivationAttempts)
        ));
    }

    #[test]
    fn deserializes_humantime_durations() {
        let cfg: RosterConfig = serde_json::from_value(serde_json::json!({
            "registry_name": "services",
            "ttl_seconds": 5,
            "heartbeat_interval": "250ms",
            "activation": { "deadline": "10s" }
        }))
        .unwrap();

        let resolved = cfg.resolve_with_env(no_env).unwrap();
        assert_eq!(resolved.registry_name, "services");
        assert_eq!(resolved.ttl, Duration::from_secs(5));
        assert_eq!(resolved.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(resolved.activation.deadline, Duration::from_secs(10));
        assert_eq!(resolved.activation.max_attempts, DEFAULT_ACTIVATION_ATTEMPTS);
    }

    #[test]
    fn resolved_config_serializes_readable_values() {
        let value = serde_json::to_value(ResolvedConfig::default()).unwrap();

        assert_eq!(value["registry_name"], DEFAULT_REGISTRY_NAME);
        assert_eq!(value["ttl"], "30s");
        assert_eq!(value["heartbeat_interval"], "300ms");
        assert_eq!(value["store_location"], DEFAULT_STORE_LOCATION);
        assert_eq!(value["activation"]["max_attempts"], DEFAULT_ACTIVATION_ATTEMPTS);
        assert_eq!(value["activation"]["deadline"], "30s");

        let memory = ResolvedConfig {
            store_location: StoreLocation::Memory,
            ..ResolvedConfig::default()
        };
        assert_eq!(serde_json::to_value(memory).unwrap()["store_location"], "memory://");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<RosterConfig, _> =
            serde_json::from_value(serde_json::json!({ "region": "us-west-2" }));
        assert!(parsed.is_err());
    }

    #[test]
    fn activation_backoff_doubles_up_to_cap() {
        let policy = ActivationPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(300),
            deadline: Duration::from_secs(30),
        };

        assert_eq!(policy.backoff_for(1), Duration::from_millis(50));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(300));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(300));
    }
}
