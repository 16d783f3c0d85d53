//! SQLite-backed registry store.
//!
//! Each registry table maps to one SQLite table holding `(pk, sk, item)`, where
//! `item` is the JSON-encoded row. Schema definitions are kept in a metadata
//! table so key extraction works across processes sharing the database file.
//! The liveness filter runs after the partition read, as in a key-value store.

use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use roster_sdk::{Row, RowQuery, SchemaDefinition, SchemaStatus, StoreError};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::debug;

use super::{validate_schema, validate_table_name};

const METADATA_TABLE: &str = "roster_schemas";
const DATA_TABLE_PREFIX: &str = "registry_";
const FILE_POOL_SIZE: u32 = 5;

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{e:#}"))
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn data_table(table: &str) -> String {
    format!("\"{DATA_TABLE_PREFIX}{table}\"")
}

/// Registry store on a SQLite database shared by all participating processes.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connects to `url` (e.g. `sqlite://roster.db`, `sqlite::memory:`),
    /// creating the database file and the metadata table when missing.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the URL is invalid or the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let is_memory = is_memory_url(url);
        let mut opts = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("invalid sqlite url '{url}'"))
            .map_err(backend)?
            .create_if_missing(true);
        if !is_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `:memory:` is a separate database.
        let pool_opts = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(FILE_POOL_SIZE)
        };

        let pool = pool_opts
            .connect_with(opts)
            .await
            .with_context(|| format!("failed to open sqlite database '{url}'"))
            .map_err(backend)?;
        Self::from_pool(pool).await
    }

    /// Wraps an existing pool, creating the metadata table when missing.
    ///
    /// # Errors
    /// Returns `StoreError::Backend` if the metadata table cannot be created.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {METADATA_TABLE} (
                name TEXT PRIMARY KEY NOT NULL,
                definition TEXT NOT NULL,
                status TEXT NOT NULL
            )"
        ))
        .execute(&pool)
        .await
        .context("failed to create schema metadata table")
        .map_err(backend)?;

        Ok(Self { pool })
    }

    async fn load_schema(
        &self,
        table: &str,
    ) -> Result<(SchemaDefinition, SchemaStatus), StoreError> {
        validate_table_name(table)?;

        let row: Option<(String, String)> = sqlx::query_as(&format!(
            "SELECT definition, status FROM {METADATA_TABLE} WHERE name = ?"
        ))
        .bind(table)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read schema of '{table}'"))
        .map_err(backend)?;

        let (definition, status) =
            row.ok_or_else(|| StoreError::SchemaNotFound(table.to_owned()))?;
        let definition: SchemaDefinition = serde_json::from_str(&definition)
            .map_err(|e| StoreError::Backend(format!("corrupt schema for '{table}': {e}")))?;
        let status: SchemaStatus = serde_json::from_value(serde_json::Value::String(status))
            .map_err(|e| StoreError::Backend(format!("corrupt status for '{table}': {e}")))?;
        Ok((definition, status))
    }

    async fn load_active_schema(&self, table: &str) -> Result<SchemaDefinition, StoreError> {
        match self.load_schema(table).await? {
            (definition, SchemaStatus::Active) => Ok(definition),
            (_, SchemaStatus::Creating) => Err(StoreError::SchemaNotActive(table.to_owned())),
        }
    }
}

#[async_trait]
impl roster_sdk::RegistryStore for SqliteStore {
    async fn describe_schema(&self, table: &str) -> Result<SchemaStatus, StoreError> {
        self.load_schema(table).await.map(|(_, status)| status)
    }

    async fn create_schema(
        &self,
        table: &str,
        schema: &SchemaDefinition,
    ) -> Result<(), StoreError> {
        validate_table_name(table)?;
        validate_schema(schema)?;
        let definition = serde_json::to_string(schema)
            .map_err(|e| StoreError::InvalidSchema(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")
            .map_err(backend)?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO {METADATA_TABLE} (name, definition, status) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING"
        ))
        .bind(table)
        .bind(&definition)
        .bind(SchemaStatus::Active.to_string())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to record schema of '{table}'"))
        .map_err(backend)?
        .rows_affected();
        if inserted == 0 {
            return Err(StoreError::SchemaAlreadyExists(table.to_owned()));
        }

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                pk TEXT NOT NULL,
                sk TEXT NOT NULL,
                item TEXT NOT NULL,
                PRIMARY KEY (pk, sk)
            )",
            data_table(table)
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to create table for '{table}'"))
        .map_err(backend)?;

        tx.commit()
            .await
            .context("failed to commit schema creation")
            .map_err(backend)?;
        debug!(table, "registry table created");
        Ok(())
    }

    async fn delete_schema(&self, table: &str) -> Result<(), StoreError> {
        validate_table_name(table)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin transaction")
            .map_err(backend)?;

        let deleted = sqlx::query(&format!("DELETE FROM {METADATA_TABLE} WHERE name = ?"))
            .bind(table)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to remove schema of '{table}'"))
            .map_err(backend)?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::SchemaNotFound(table.to_owned()));
        }

        sqlx::query(&format!("DROP TABLE IF EXISTS {}", data_table(table)))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to drop table for '{table}'"))
            .map_err(backend)?;

        tx.commit()
            .await
            .context("failed to commit schema deletion")
            .map_err(backend)?;
        debug!(table, "registry table deleted");
        Ok(())
    }

    async fn put_row(&self, table: &str, row: Row) -> Result<(), StoreError> {
        let schema = self.load_active_schema(table).await?;
        let (pk, sk) = schema
            .key_of(&row)
            .map_err(|e| StoreError::InvalidSchema(e.to_string()))?;
        let item = serde_json::to_string(&row).map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(&format!(
            "INSERT INTO {} (pk, sk, item) VALUES (?, ?, ?)
             ON CONFLICT(pk, sk) DO UPDATE SET item = excluded.item",
            data_table(table)
        ))
        .bind(pk)
        .bind(sk)
        .bind(&item)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write row to '{table}'"))
        .map_err(backend)?;
        Ok(())
    }

    async fn query(&self, table: &str, query: &RowQuery) -> Result<Vec<Row>, StoreError> {
        self.load_active_schema(table).await?;

        let items: Vec<(String,)> = sqlx::query_as(&format!(
            "SELECT item FROM {} WHERE pk = ?",
            data_table(table)
        ))
        .bind(&query.partition_value)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to query '{table}'"))
        .map_err(backend)?;

        let mut rows = Vec::with_capacity(items.len());
        for (item,) in items {
            let row: Row = serde_json::from_str(&item)
                .map_err(|e| StoreError::Backend(format!("corrupt row in '{table}': {e}")))?;
            if query.matches(&row) {
                rows.push(row);
            }
        }
        Ok(rows)
    }
}
