//! Registry store implementations and the factory that picks one from a
//! [`StoreLocation`].

use std::sync::Arc;

use roster_sdk::{RegistryStore, SchemaDefinition, StoreError};

use crate::config::StoreLocation;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Opens the store a resolved configuration points at.
///
/// # Errors
/// Returns `StoreError::Backend` if the backend cannot be reached, or if the
/// location needs a store that was compiled out.
pub async fn open_store(location: &StoreLocation) -> Result<Arc<dyn RegistryStore>, StoreError> {
    match location {
        StoreLocation::Memory => Ok(Arc::new(InMemoryStore::new())),
        #[cfg(feature = "sqlite")]
        StoreLocation::Sqlite(url) => Ok(Arc::new(SqliteStore::connect(url).await?)),
        #[cfg(not(feature = "sqlite"))]
        StoreLocation::Sqlite(url) => Err(StoreError::Backend(format!(
            "cannot open '{url}': sqlite feature not enabled"
        ))),
    }
}

/// Rejects definitions whose keys are not declared string attributes.
pub(crate) fn validate_schema(schema: &SchemaDefinition) -> Result<(), StoreError> {
    for key in [&schema.partition_key, &schema.sort_key] {
        let declared = schema
            .attributes
            .iter()
            .any(|a| &a.name == key && a.ty == roster_sdk::AttributeType::String);
        if !declared {
            return Err(StoreError::InvalidSchema(format!(
                "key attribute '{key}' is not declared as a string attribute"
            )));
        }
    }
    if schema.partition_key == schema.sort_key {
        return Err(StoreError::InvalidSchema(
            "partition and sort keys must differ".to_owned(),
        ));
    }
    Ok(())
}

/// Table names end up in SQL identifiers, so only a conservative alphabet is accepted.
pub(crate) fn validate_table_name(table: &str) -> Result<(), StoreError> {
    if roster_sdk::is_valid_registry_name(table) {
        Ok(())
    } else {
        Err(StoreError::InvalidSchema(format!(
            "invalid registry table name '{table}'"
        )))
    }
}
