use std::sync::Arc;

use roster_sdk::{RegistryStore, RosterError, SchemaDefinition, SchemaStatus, StoreError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ActivationPolicy;

/// The shared registry table all participants read and write.
///
/// Lifecycle: absent, then `Creating` after [`Registry::create`], then `Active`.
#[derive(Clone)]
pub struct Registry {
    name: String,
    store: Arc<dyn RegistryStore>,
    activation: ActivationPolicy,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("activation", &self.activation)
            .finish_non_exhaustive()
    }
}

impl Registry {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn RegistryStore>,
        activation: ActivationPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            activation,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the registry table exists, in any state.
    ///
    /// # Errors
    /// Store failures other than "not found".
    pub async fn exists(&self) -> Result<bool, RosterError> {
        match self.store.describe_schema(&self.name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether the registry table is ready for reads and writes.
    ///
    /// # Errors
    /// Every store failure, "not found" included.
    pub async fn is_active(&self) -> Result<bool, RosterError> {
        let status = self.store.describe_schema(&self.name).await?;
        Ok(status == SchemaStatus::Active)
    }

    /// Current status, `None` when the table does not exist.
    ///
    /// # Errors
    /// Store failures other than "not found".
    pub async fn status(&self) -> Result<Option<SchemaStatus>, RosterError> {
        match self.store.describe_schema(&self.name).await {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates the registry table and waits until it is active.
    ///
    /// A table that already exists is waited on rather than treated as an error,
    /// so concurrent bootstraps converge.
    ///
    /// # Errors
    /// `RosterError::RegistryNotActive` when the attempts or the deadline run out;
    /// store failures from creation or from any poll are returned as they occur.
    pub async fn create(&self) -> Result<(), RosterError> {
        match self
            .store
            .create_schema(&self.name, &SchemaDefinition::service_registry())
            .await
        {
            Ok(()) => info!(registry = %self.name, "registry creation requested"),
            Err(StoreError::SchemaAlreadyExists(_)) => {
                debug!(registry = %self.name, "registry already exists, waiting for it to become active");
            }
            Err(e) => return Err(e.into()),
        }

        self.wait_until_active().await
    }

    /// Deletes the registry table and every record in it.
    ///
    /// # Errors
    /// Store failures, unchanged.
    pub async fn delete(&self) -> Result<(), RosterError> {
        self.store.delete_schema(&self.name).await?;
        info!(registry = %self.name, "registry deleted");
        Ok(())
    }

    async fn wait_until_active(&self) -> Result<(), RosterError> {
        let policy = self.activation;
        // `None` only when the deadline is too far out to represent.
        let deadline = Instant::now().checked_add(policy.deadline);
        let mut attempts = 0;

        loop {
            attempts += 1;
            if self.is_active().await? {
                info!(registry = %self.name, attempts, "registry is active");
                return Ok(());
            }

            let now = Instant::now();
            if attempts >= policy.max_attempts || deadline.is_some_and(|d| now >= d) {
                break;
            }

            let backoff = policy.backoff_for(attempts);
            let pause = deadline.map_or(backoff, |d| backoff.min(d - now));
            debug!(
                registry = %self.name,
                attempt = attempts,
                backoff_ms = pause.as_millis(),
                "registry not active yet"
            );
            tokio::time::sleep(pause).await;
        }

        warn!(registry = %self.name, attempts, "registry did not become active");
        Err(RosterError::RegistryNotActive {
            registry: self.name.clone(),
            attempts,
        })
    }
}
