//! In-process registry store.
//!
//! Tables live in a `DashMap`; schema creation can be made asynchronous with an
//! activation delay so bootstrap polling behaves as against a remote store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use roster_sdk::{Row, RowQuery, SchemaDefinition, SchemaStatus, StoreError};
use tokio::time::Instant;

use super::validate_schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Immediate,
    After(Duration),
    Never,
}

#[derive(Debug)]
struct Table {
    schema: SchemaDefinition,
    /// `None` means the table never leaves `Creating`.
    active_at: Option<Instant>,
    rows: HashMap<(String, String), Row>,
}

impl Table {
    fn status(&self) -> SchemaStatus {
        match self.active_at {
            Some(at) if Instant::now() >= at => SchemaStatus::Active,
            _ => SchemaStatus::Creating,
        }
    }
}

/// Registry store kept in process memory.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: DashMap<String, Table>,
    activation: Activation,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Tables become active as soon as they are created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            activation: Activation::Immediate,
        }
    }

    /// Tables report `Creating` for `delay` after creation.
    #[must_use]
    pub fn with_activation_delay(delay: Duration) -> Self {
        Self {
            tables: DashMap::new(),
            activation: Activation::After(delay),
        }
    }

    /// Tables never become active.
    #[must_use]
    pub fn never_active() -> Self {
        Self {
            tables: DashMap::new(),
            activation: Activation::Never,
        }
    }

    /// Number of rows stored in `table`, expired ones included.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn active_at(&self) -> Option<Instant> {
        match self.activation {
            Activation::Immediate => Some(Instant::now()),
            Activation::After(delay) => Instant::now().checked_add(delay),
            Activation::Never => None,
        }
    }
}

#[async_trait]
impl roster_sdk::RegistryStore for InMemoryStore {
    async fn describe_schema(&self, table: &str) -> Result<SchemaStatus, StoreError> {
        self.tables
            .get(table)
            .map(|t| t.status())
            .ok_or_else(|| StoreError::SchemaNotFound(table.to_owned()))
    }

    async fn create_schema(
        &self,
        table: &str,
        schema: &SchemaDefinition,
    ) -> Result<(), StoreError> {
        validate_schema(schema)?;

        match self.tables.entry(table.to_owned()) {
            Entry::Occupied(_) => Err(StoreError::SchemaAlreadyExists(table.to_owned())),
            Entry::Vacant(slot) => {
                slot.insert(Table {
                    schema: schema.clone(),
                    active_at: self.active_at(),
                    rows: HashMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn delete_schema(&self, table: &str) -> Result<(), StoreError> {
        self.tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| StoreError::SchemaNotFound(table.to_owned()))
    }

    async fn put_row(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| StoreError::SchemaNotFound(table.to_owned()))?;
        if entry.status() != SchemaStatus::Active {
            return Err(StoreError::SchemaNotActive(table.to_owned()));
        }

        let key = entry
            .schema
            .key_of(&row)
            .map(|(pk, sk)| (pk.to_owned(), sk.to_owned()))
            .map_err(|e| StoreError::InvalidSchema(e.to_string()))?;
        entry.rows.insert(key, row);
        Ok(())
    }

    async fn query(&self, table: &str, query: &RowQuery) -> Result<Vec<Row>, StoreError> {
        let entry = self
            .tables
            .get(table)
            .ok_or_else(|| StoreError::SchemaNotFound(table.to_owned()))?;
        if entry.status() != SchemaStatus::Active {
            return Err(StoreError::SchemaNotActive(table.to_owned()));
        }

        Ok(entry
            .rows
            .iter()
            .filter(|((pk, _), row)| *pk == query.partition_value && query.matches(row))
            .map(|(_, row)| row.clone())
            .collect())
    }
}
