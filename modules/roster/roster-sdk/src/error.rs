//! Error types for roster registration and discovery.

use thiserror::Error;

/// Errors surfaced by registration, discovery, and registry bootstrap.
#[derive(Debug, Error)]
pub enum RosterError {
    /// No live instance is currently registered under the name.
    ///
    /// This is an expected outcome, not a system failure.
    #[error("no live instance of service '{name}' found")]
    ServiceNotFound { name: String },

    #[error("no non-loopback local IPv4 address could be found")]
    LocalIpNotFound,

    #[error("failed to enumerate network interfaces: {0}")]
    InterfaceLookup(String),

    /// The registry did not reach the active state within the polling budget,
    /// or it is not active when discovery requires it.
    #[error("registry '{registry}' is not active after {attempts} attempts")]
    RegistryNotActive { registry: String, attempts: u32 },

    /// A row read from the store does not describe a service record.
    #[error("malformed registry row: {0}")]
    Decode(String),

    /// Store failure, propagated unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RosterError {
    /// `true` when discovery found no live instance.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ServiceNotFound { .. })
    }
}

/// Errors reported by a [`crate::RegistryStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("registry table '{0}' not found")]
    SchemaNotFound(String),

    #[error("registry table '{0}' already exists")]
    SchemaAlreadyExists(String),

    #[error("registry table '{0}' is not active")]
    SchemaNotActive(String),

    #[error("invalid registry schema: {0}")]
    InvalidSchema(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SchemaNotFound(_))
    }
}
