//! Roster SDK
//!
//! This crate provides the public contracts of roster:
//!
//! - [`DiscoveryApi`] - discovery trait for consumers
//! - [`RegistryStore`] - contract for registry backends
//! - [`ServiceRecord`], [`Row`], [`SchemaDefinition`] - data model
//! - [`RosterError`], [`StoreError`] - error types
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod api;
pub mod error;
pub mod models;
pub mod store_api;

pub use api::DiscoveryApi;
pub use error::{RosterError, StoreError};
pub use models::{
    ATTR_ENDPOINT, ATTR_EXPIRY, ATTR_NAME, AttributeDefinition, AttributeType, AttributeValue,
    CapacityHints, MAX_REGISTRY_NAME_LEN, Row, RowQuery, SchemaDefinition, SchemaStatus,
    ServiceRecord, is_valid_registry_name,
};
pub use store_api::RegistryStore;
