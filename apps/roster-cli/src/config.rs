//! Layered configuration for the `roster` binary.
//!
//! Order (later wins): built-in defaults, YAML file (`--config`), environment
//! variables prefixed with `ROSTER__` (nested keys separated by `__`), then
//! command-line flags.

use std::path::Path;

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use roster::RosterConfig;
use serde::Serialize;

pub const ENV_PREFIX: &str = "ROSTER__";

/// Values set on the command line. Unset flags leave lower layers untouched.
#[derive(Debug, Default, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_location: Option<String>,
}

pub fn load(path: Option<&Path>, overrides: &CliOverrides) -> Result<RosterConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if !path.is_file() {
            bail!("config file does not exist: {}", path.display());
        }
        figment = figment.merge(Yaml::file(path));
    }

    figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
        .extract()
        .context("invalid roster configuration")
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn yaml_file_is_overridden_by_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.yaml");
        std::fs::write(
            &path,
            "registry_name: from-file\nttl_seconds: 12\nheartbeat_interval: 2s\nactivation:\n  max_attempts: 4\n",
        )
        .unwrap();

        let overrides = CliOverrides {
            registry_name: Some("from-flag".to_owned()),
            ..CliOverrides::default()
        };
        let config = load(Some(&path), &overrides).unwrap();

        assert_eq!(config.registry_name.as_deref(), Some("from-flag"));
        assert_eq!(config.ttl_seconds, Some(12));
        assert_eq!(config.heartbeat_interval, Some(Duration::from_secs(2)));
        assert_eq!(config.activation.max_attempts, Some(4));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(
            Some(Path::new("/definitely/not/here.yaml")),
            &CliOverrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.yaml");
        std::fs::write(&path, "region: us-west-2\n").unwrap();

        assert!(load(Some(&path), &CliOverrides::default()).is_err());
    }
}
