//! Registry store contract.
//!
//! The backing store is an external collaborator: a table of rows keyed by
//! `(partition, sort)` attributes, with asynchronous schema creation and
//! partition queries filtered after the read.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Row, RowQuery, SchemaDefinition, SchemaStatus};

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Reports the status of `table`.
    ///
    /// # Errors
    /// `StoreError::SchemaNotFound` when the table does not exist.
    async fn describe_schema(&self, table: &str) -> Result<SchemaStatus, StoreError>;

    /// Requests creation of `table`. Creation may complete asynchronously;
    /// callers poll [`RegistryStore::describe_schema`] until `Active`.
    ///
    /// # Errors
    /// `StoreError::SchemaAlreadyExists` when the table exists.
    async fn create_schema(&self, table: &str, schema: &SchemaDefinition)
    -> Result<(), StoreError>;

    /// Drops `table` and every row in it.
    ///
    /// # Errors
    /// `StoreError::SchemaNotFound` when the table does not exist.
    async fn delete_schema(&self, table: &str) -> Result<(), StoreError>;

    /// Writes `row`, replacing any row with the same key.
    ///
    /// # Errors
    /// Fails if the table is missing or inactive, or the row lacks key attributes.
    async fn put_row(&self, table: &str, row: Row) -> Result<(), StoreError>;

    /// Reads the partition selected by `query` and returns the rows passing its filter.
    /// Result order is unspecified.
    ///
    /// # Errors
    /// Fails if the table is missing or inactive.
    async fn query(&self, table: &str, query: &RowQuery) -> Result<Vec<Row>, StoreError>;
}
