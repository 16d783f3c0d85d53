//! Service record and registry schema models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RosterError;

/// Partition key attribute of the registry table.
pub const ATTR_NAME: &str = "Name";
/// Sort key attribute of the registry table.
pub const ATTR_ENDPOINT: &str = "Endpoint";
/// Absolute Unix timestamp (seconds) after which a record is stale.
pub const ATTR_EXPIRY: &str = "Expiry";

/// Longest accepted registry name.
pub const MAX_REGISTRY_NAME_LEN: usize = 255;

/// Registry names end up in store identifiers (SQL table names), so only
/// ASCII letters, digits, `_`, `-` and `.` are accepted.
#[must_use]
pub fn is_valid_registry_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_REGISTRY_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// One advertisement: a named service reachable at an endpoint until `expiry`.
///
/// `(name, endpoint)` is the identity of the advertisement. Several instances
/// may share a `name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub endpoint: String,
    pub expiry: i64,
}

impl ServiceRecord {
    /// Creates a record that has never been heartbeated (`expiry = 0`).
    #[must_use]
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            expiry: 0,
        }
    }

    /// Encodes the record into a registry row.
    #[must_use]
    pub fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert(ATTR_NAME, AttributeValue::S(self.name.clone()));
        row.insert(ATTR_ENDPOINT, AttributeValue::S(self.endpoint.clone()));
        row.insert(ATTR_EXPIRY, AttributeValue::N(self.expiry));
        row
    }
}

impl TryFrom<&Row> for ServiceRecord {
    type Error = RosterError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        Ok(Self {
            name: row.string(ATTR_NAME)?.to_owned(),
            endpoint: row.string(ATTR_ENDPOINT)?.to_owned(),
            expiry: row.number(ATTR_EXPIRY)?,
        })
    }
}

/// Scalar attribute value stored in a registry row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String attribute.
    S(String),
    /// Integer attribute.
    N(i64),
}

impl AttributeValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            Self::N(_) => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::N(n) => Some(*n),
            Self::S(_) => None,
        }
    }
}

/// A registry row: attribute name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, AttributeValue>);

impl Row {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, attr: impl Into<String>, value: AttributeValue) {
        self.0.insert(attr.into(), value);
    }

    #[must_use]
    pub fn get(&self, attr: &str) -> Option<&AttributeValue> {
        self.0.get(attr)
    }

    /// Returns a string attribute.
    ///
    /// # Errors
    /// Returns `RosterError::Decode` if the attribute is missing or not a string.
    pub fn string(&self, attr: &str) -> Result<&str, RosterError> {
        self.get(attr)
            .and_then(AttributeValue::as_str)
            .ok_or_else(|| RosterError::Decode(format!("missing string attribute '{attr}'")))
    }

    /// Returns an integer attribute.
    ///
    /// # Errors
    /// Returns `RosterError::Decode` if the attribute is missing or not an integer.
    pub fn number(&self, attr: &str) -> Result<i64, RosterError> {
        self.get(attr)
            .and_then(AttributeValue::as_i64)
            .ok_or_else(|| RosterError::Decode(format!("missing numeric attribute '{attr}'")))
    }
}

/// Lifecycle status reported by `describe_schema`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaStatus {
    /// Creation accepted, not yet usable.
    Creating,
    /// Ready for reads and writes.
    Active,
}

impl std::fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "CREATING"),
            Self::Active => write!(f, "ACTIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    pub ty: AttributeType,
}

/// Provisioned throughput hints. Stores without capacity planning ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityHints {
    pub read_units: u32,
    pub write_units: u32,
}

/// Declared layout of a registry table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub attributes: Vec<AttributeDefinition>,
    pub partition_key: String,
    pub sort_key: String,
    pub capacity: CapacityHints,
}

impl SchemaDefinition {
    /// The service registry layout: partition by `Name`, sort by `Endpoint`.
    #[must_use]
    pub fn service_registry() -> Self {
        Self {
            attributes: vec![
                AttributeDefinition {
                    name: ATTR_NAME.to_owned(),
                    ty: AttributeType::String,
                },
                AttributeDefinition {
                    name: ATTR_ENDPOINT.to_owned(),
                    ty: AttributeType::String,
                },
            ],
            partition_key: ATTR_NAME.to_owned(),
            sort_key: ATTR_ENDPOINT.to_owned(),
            capacity: CapacityHints {
                read_units: 1,
                write_units: 1,
            },
        }
    }

    /// Extracts the `(partition, sort)` key of a row.
    ///
    /// # Errors
    /// Returns `RosterError::Decode` if either key attribute is missing or not a string.
    pub fn key_of<'a>(&self, row: &'a Row) -> Result<(&'a str, &'a str), RosterError> {
        Ok((row.string(&self.partition_key)?, row.string(&self.sort_key)?))
    }
}

/// Partition query with a single "greater than" filter applied after the read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub partition_value: String,
    pub filter_attr: String,
    pub filter_greater_than: i64,
}

impl RowQuery {
    /// Live records under `name` at `now_unix`.
    #[must_use]
    pub fn live(name: impl Into<String>, now_unix: i64) -> Self {
        Self {
            partition_value: name.into(),
            filter_attr: ATTR_EXPIRY.to_owned(),
            filter_greater_than: now_unix,
        }
    }

    /// Whether a row read from the partition passes the filter.
    ///
    /// Rows without a numeric filter attribute never match.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.filter_attr)
            .and_then(AttributeValue::as_i64)
            .is_some_and(|v| v > self.filter_greater_than)
    }
}
