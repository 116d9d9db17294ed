//! Serialisable shapes shared between the vault library and its tooling.
//!
//! [`Envelope`] is what lands in a JSON-typed physical column; the rotation
//! types are what the migration CLI prints and persists.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// JSON wrapper carrying a base64-encoded token inside a JSON-typed column.
///
/// Serialises as `{"_encrypted": true, "_data": "<base64 token>"}`. The
/// underscore-prefixed names are reserved; a document carrying any other key
/// is not an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    /// Always `true` for a well-formed envelope.
    #[serde(rename = "_encrypted")]
    pub encrypted: bool,
    /// Standard base64 of the token's ASCII bytes.
    #[serde(rename = "_data")]
    pub data: String,
}

impl Envelope {
    /// Reserved marker key.
    pub const ENCRYPTED_KEY: &'static str = "_encrypted";
    /// Reserved payload key.
    pub const DATA_KEY: &'static str = "_data";

    /// Wrap already base64-encoded token data.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            encrypted: true,
            data: data.into(),
        }
    }

    /// Recognise an envelope inside a JSON value.
    ///
    /// Returns `None` unless the value is an object with exactly the two
    /// reserved keys and `_encrypted` is `true`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        if map.len() != 2 || !map.contains_key(Self::ENCRYPTED_KEY) {
            return None;
        }
        let env: Envelope = serde_json::from_value(value.clone()).ok()?;
        env.encrypted.then_some(env)
    }

    /// Render the envelope as a JSON object.
    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(2);
        map.insert(Self::ENCRYPTED_KEY.to_owned(), Value::Bool(self.encrypted));
        map.insert(Self::DATA_KEY.to_owned(), Value::String(self.data.clone()));
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Rotation reporting
// ---------------------------------------------------------------------------

/// Lifecycle of a rotation or bulk-encryption job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

/// Per-table counters produced by a rotation job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    /// Table name.
    pub table: String,
    /// Records loaded and examined.
    pub visited: u64,
    /// Records with at least one field (re-)encrypted under the new key.
    pub re_encrypted: u64,
    /// Records whose encrypted fields were already current or null.
    pub unchanged: u64,
    /// Records skipped because a field could not be recovered.
    pub failed: u64,
}

impl TableReport {
    /// Empty counters for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }
}

/// Aggregate outcome of a rotation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RotationReport {
    /// Identifier used to correlate logs and checkpoints.
    pub job_id: Uuid,
    /// Whether writes were suppressed.
    pub dry_run: bool,
    /// Terminal (or current) state of the job.
    pub state: JobState,
    /// Counters in table processing order.
    pub tables: Vec<TableReport>,
    /// Why the job stopped, when `state` is [`JobState::Failed`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RotationReport {
    /// A report for a job that has not processed anything yet.
    pub fn new(job_id: Uuid, dry_run: bool) -> Self {
        Self {
            job_id,
            dry_run,
            state: JobState::NotStarted,
            tables: Vec::new(),
            error: None,
        }
    }

    /// Sum of `re_encrypted` over all tables.
    pub fn total_re_encrypted(&self) -> u64 {
        self.tables.iter().map(|t| t.re_encrypted).sum()
    }

    /// Sum of `failed` over all tables.
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Sum of `visited` over all tables.
    pub fn total_visited(&self) -> u64 {
        self.tables.iter().map(|t| t.visited).sum()
    }

    /// Counters for a single table, if it was processed.
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }
}
