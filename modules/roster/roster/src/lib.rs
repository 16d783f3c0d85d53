#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Roster: TTL-based service registration and discovery.
//!
//! A service registers a `(name, endpoint)` pair in a shared registry table.
//! A background heartbeat keeps rewriting the record with a fresh expiry; readers
//! only see records whose expiry lies in the future, so a crashed or
//! unregistered instance disappears once its last lease runs out.
//!
//! ```no_run
//! use roster::{Client, DiscoveryApi, RosterConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let client = Client::connect(&RosterConfig::default()).await?;
//! let handle = client.register("echo", "tcp://10.0.0.5:3333", None).await?;
//!
//! let instance = client.discover("echo").await?;
//! println!("echo lives at {}", instance.endpoint);
//!
//! handle.unregister().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod infra;

pub use config::{
    ActivationConfig, ActivationPolicy, ConfigError, ResolvedConfig, RosterConfig, StoreLocation,
};
pub use domain::client::{Client, ConnectError, select_random};
pub use domain::heartbeat::{HeartbeatStats, ServiceHandle, ServiceState};
pub use domain::local_ip::local_ip;
pub use domain::registry::Registry;
pub use infra::storage::{InMemoryStore, open_store};
#[cfg(feature = "sqlite")]
pub use infra::storage::SqliteStore;

pub use roster_sdk::{
    DiscoveryApi, RegistryStore, RosterError, Row, RowQuery, SchemaDefinition, SchemaStatus,
    ServiceRecord, StoreError,
};
