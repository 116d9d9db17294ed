//! Persistence collaborator contract used by the rotation workflow.
//!
//! The encryption layer never talks to a database on the request path; the
//! host persistence layer calls the adapters inline. Bulk jobs, however, need
//! to page through whole tables and commit rewritten values, which is what
//! [`RecordStore`] abstracts.
//!
//! Two implementations ship with the crate: [`MemoryStore`] for tests and
//! [`SqliteStore`] for single-file deployments.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::column::StoredValue;

/// Errors from a record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// A table or column name is not a plain SQL identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// An update referenced a record that does not exist; nothing in the
    /// batch was applied.
    #[error("record {id} not found in {table}")]
    MissingRecord { table: String, id: RecordId },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The blocking worker panicked or the connection lock was poisoned.
    #[error("store worker failed: {0}")]
    Worker(String),
}

/// Primary key value. Integer keys sort numerically, text keys lexically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(i) => write!(f, "{i}"),
            RecordId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordId {
    fn from(i: i64) -> Self {
        RecordId::Int(i)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId::Text(s.to_owned())
    }
}

/// A loaded row: its key and the requested columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub values: BTreeMap<String, StoredValue>,
}

/// New values for some columns of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub id: RecordId,
    pub values: BTreeMap<String, StoredValue>,
}

/// Keyset-paged access to entity tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Load up to `limit` records of `table` with primary key strictly greater
    /// than `after` (or from the start), ordered by primary key.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is unknown or the backend fails.
    async fn load_batch(
        &self,
        table: &str,
        primary_key: &str,
        columns: &[String],
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError>;

    /// Apply all `updates` in one transaction: either every update is
    /// committed or none is.
    ///
    /// # Errors
    ///
    /// Returns an error if any update cannot be applied.
    async fn write_batch(
        &self,
        table: &str,
        primary_key: &str,
        updates: &[RecordUpdate],
    ) -> Result<(), StoreError>;
}

fn check_identifier(s: &str) -> Result<(), StoreError> {
    if crate::schema::is_identifier(s) {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_ids_order_and_serialise() {
        assert!(RecordId::Int(2) < RecordId::Int(10));
        assert!(RecordId::from("a") < RecordId::from("b"));
        assert_eq!(serde_json::to_string(&RecordId::Int(7)).unwrap(), "7");
        assert_eq!(
            serde_json::from_str::<RecordId>("\"loan-9\"").unwrap(),
            RecordId::Text("loan-9".into())
        );
        assert_eq!(RecordId::Int(42).to_string(), "42");
    }

    #[test]
    fn identifiers_are_checked() {
        assert!(check_identifier("borrowers").is_ok());
        assert!(matches!(
            check_identifier("x; DROP TABLE y"),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }
}
