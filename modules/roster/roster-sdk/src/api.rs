//! Public discovery API trait.
//!
//! Consumers that only resolve endpoints depend on this trait rather than on
//! the concrete client:
//!
//! ```ignore
//! let discovery: Arc<dyn DiscoveryApi> = Arc::new(client);
//!
//! match discovery.discover("echo").await {
//!     Ok(service) => connect(&service.endpoint).await?,
//!     Err(e) if e.is_not_found() => retry_later(),
//!     Err(e) => return Err(e.into()),
//! }
//! ```

use async_trait::async_trait;

use crate::error::RosterError;
use crate::models::ServiceRecord;

#[async_trait]
pub trait DiscoveryApi: Send + Sync {
    /// Returns one live instance of `name`, chosen uniformly at random.
    ///
    /// # Errors
    ///
    /// - `ServiceNotFound` if no live instance is registered
    /// - `RegistryNotActive` if the registry is required to be active and is not
    /// - `Store` / `Decode` on store failures or malformed rows
    async fn discover(&self, name: &str) -> Result<ServiceRecord, RosterError>;

    /// Returns every live instance of `name`. An empty list is not an error.
    ///
    /// # Errors
    ///
    /// Same as [`DiscoveryApi::discover`], except that no live instance yields `Ok(vec![])`.
    async fn discover_all(&self, name: &str) -> Result<Vec<ServiceRecord>, RosterError>;
}
