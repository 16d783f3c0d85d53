use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::IndexedRandom;
use roster_sdk::{
    DiscoveryApi, RegistryStore, RosterError, RowQuery, SchemaStatus, ServiceRecord, StoreError,
};
use tracing::{debug, info, warn};

use super::heartbeat::ServiceHandle;
use super::registry::Registry;
use super::unix_now;
use crate::config::{ConfigError, ResolvedConfig, RosterConfig};
use crate::infra::storage::open_store;

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open registry store: {0}")]
    Store(#[from] StoreError),
}

/// Entry point for registering and discovering services.
///
/// Cheap to clone; clones share the store.
#[derive(Clone)]
pub struct Client {
    config: ResolvedConfig,
    store: Arc<dyn RegistryStore>,
    registry: Registry,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Resolves `config` against the environment and opens the configured store.
    ///
    /// # Errors
    /// `ConnectError::Config` for invalid configuration, `ConnectError::Store`
    /// if the store cannot be opened.
    pub async fn connect(config: &RosterConfig) -> Result<Self, ConnectError> {
        Self::open(config.resolve()?).await
    }

    /// Opens the store named by an already resolved configuration.
    ///
    /// # Errors
    /// `ConnectError::Store` if the store cannot be opened.
    pub async fn open(config: ResolvedConfig) -> Result<Self, ConnectError> {
        let store = open_store(&config.store_location).await?;
        debug!(
            registry = %config.registry_name,
            store = %config.store_location,
            "roster client ready"
        );
        Ok(Self::with_store(config, store))
    }

    /// Builds a client over a caller-provided store.
    #[must_use]
    pub fn with_store(config: ResolvedConfig, store: Arc<dyn RegistryStore>) -> Self {
        let registry = Registry::new(
            config.registry_name.clone(),
            Arc::clone(&store),
            config.activation,
        );
        Self {
            config,
            store,
            registry,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Advertises `endpoint` under `name` and keeps it alive until unregistered.
    ///
    /// Creates the registry if it does not exist yet. A `ttl` of `None` or zero
    /// uses the configured TTL. The first heartbeat is written before returning;
    /// its failure is recorded in the handle's stats rather than returned.
    ///
    /// # Errors
    /// Registry bootstrap failures.
    pub async fn register(
        &self,
        name: &str,
        endpoint: &str,
        ttl: Option<Duration>,
    ) -> Result<ServiceHandle, RosterError> {
        if !self.registry.exists().await? {
            info!(registry = %self.registry.name(), "registry missing, creating it");
            self.registry.create().await?;
        }

        let ttl = ttl
            .filter(|t| !t.is_zero())
            .unwrap_or(self.config.ttl);
        if ttl <= self.config.heartbeat_interval {
            warn!(
                service = name,
                ttl_ms = ttl.as_millis(),
                interval_ms = self.config.heartbeat_interval.as_millis(),
                "TTL does not exceed the heartbeat interval, the record will flap"
            );
        }

        let handle = ServiceHandle::start(
            self.registry.name().to_owned(),
            Arc::clone(&self.store),
            ServiceRecord::new(name, endpoint),
            ttl,
            self.config.heartbeat_interval,
        )
        .await;

        info!(
            registry = %self.registry.name(),
            service = name,
            endpoint,
            ttl_secs = handle.ttl().as_secs(),
            "service registered"
        );
        Ok(handle)
    }

    async fn live_records(&self, name: &str) -> Result<Vec<ServiceRecord>, RosterError> {
        if self.config.verify_registry_on_discover
            && self.registry.status().await? != Some(SchemaStatus::Active)
        {
            return Err(RosterError::RegistryNotActive {
                registry: self.registry.name().to_owned(),
                attempts: 1,
            });
        }

        let rows = self
            .store
            .query(self.registry.name(), &RowQuery::live(name, unix_now()))
            .await?;
        rows.iter().map(ServiceRecord::try_from).collect()
    }
}

/// Picks one candidate uniformly at random.
#[must_use]
pub fn select_random<'a, T, R>(candidates: &'a [T], rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
{
    candidates.choose(rng)
}

#[async_trait]
impl DiscoveryApi for Client {
    async fn discover(&self, name: &str) -> Result<ServiceRecord, RosterError> {
        let records = self.live_records(name).await?;
        let chosen = select_random(&records, &mut rand::rng())
            .cloned()
            .ok_or_else(|| RosterError::ServiceNotFound {
                name: name.to_owned(),
            })?;

        debug!(service = name, endpoint = %chosen.endpoint, candidates = records.len(), "discovered");
        Ok(chosen)
    }

    async fn discover_all(&self, name: &str) -> Result<Vec<ServiceRecord>, RosterError> {
        let mut records = self.live_records(name).await?;
        records.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        Ok(records)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::config::StoreLocation;
    use crate::infra::storage::InMemoryStore;

    fn memory_config() -> ResolvedConfig {
        ResolvedConfig {
            store_location: StoreLocation::Memory,
            ..ResolvedConfig::default()
        }
    }

    #[test]
    fn selection_is_roughly_uniform() {
        let candidates = ["http://h1", "http://h2"];
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen: HashMap<&str, u32> = HashMap::new();

        for _ in 0..1000 {
            let pick = select_random(&candidates, &mut rng).unwrap();
            *seen.entry(*pick).or_default() += 1;
        }

        for endpoint in candidates {
            let hits = seen[endpoint];
            assert!((400..=600).contains(&hits), "{endpoint}: {hits}");
        }
    }

    #[test]
    fn selection_from_nothing_is_none() {
        let empty: [&str; 0] = [];
        assert!(select_random(&empty, &mut rand::rng()).is_none());
    }

    #[tokio::test]
    async fn discover_requires_active_registry() {
        let client = Client::with_store(memory_config(), Arc::new(InMemoryStore::new()));
        let err = client.discover("svc").await.unwrap_err();
        assert!(matches!(err, RosterError::RegistryNotActive { .. }));
    }

    #[tokio::test]
    async fn unverified_discover_surfaces_store_error() {
        let config = ResolvedConfig {
            verify_registry_on_discover: false,
            ..memory_config()
        };
        let client = Client::with_store(config, Arc::new(InMemoryStore::new()));
        let err = client.discover("svc").await.unwrap_err();
        assert!(matches!(err, RosterError::Store(StoreError::SchemaNotFound(_))));
    }

    #[tokio::test]
    async fn register_bootstraps_registry_and_discovers() {
        let store = Arc::new(InMemoryStore::new());
        let client = Client::with_store(memory_config(), store.clone());

        let handle = client.register("svc", "http://h1", None).await.unwrap();
        assert!(client.registry().is_active().await.unwrap());
        assert_eq!(handle.ttl(), Duration::from_secs(30));

        let found = client.discover("svc").await.unwrap();
        assert_eq!(found.endpoint, "http://h1");
        assert!(found.expiry > unix_now());

        let err = client.discover("other").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn call_site_ttl_overrides_config() {
        let client = Client::with_store(memory_config(), Arc::new(InMemoryStore::new()));
        let handle = client
            .register("svc", "http://h1", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(handle.ttl(), Duration::from_secs(5));

        let handle = client
            .register("svc", "http://h2", Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(handle.ttl(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn discover_all_lists_every_live_endpoint() {
        let client = Client::with_store(memory_config(), Arc::new(InMemoryStore::new()));
        let _h2 = client.register("svc", "http://h2", None).await.unwrap();
        let _h1 = client.register("svc", "http://h1", None).await.unwrap();

        let all = client.discover_all("svc").await.unwrap();
        let endpoints: Vec<_> = all.iter().map(|r| r.endpoint.as_str()).collect();
        assert_eq!(endpoints, ["http://h1", "http://h2"]);

        assert!(client.discover_all("nobody").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn register_fails_when_registry_never_activates() {
        let store = Arc::new(InMemoryStore::never_active());
        let client = Client::with_store(memory_config(), store.clone());

        let err = client.register("svc", "http://h1", None).await.unwrap_err();
        assert!(matches!(
            err,
            RosterError::RegistryNotActive { attempts: 10, .. }
        ));
        assert_eq!(store.row_count("roster"), 0);
    }
}
