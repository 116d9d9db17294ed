//! Resume point of a rotation job, persisted after every committed batch.
//!
//! A checkpoint names the job kind and both key fingerprints, so a file left
//! by one job is never resumed by a job targeting another key.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{JobKind, RotationError};
use crate::store::RecordId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub job_id: Uuid,
    pub kind: JobKind,
    /// Fingerprint of the key data is read under.
    pub old_key: String,
    /// Fingerprint of the key data is written under.
    pub new_key: String,
    /// Table in progress, if any.
    pub table: Option<String>,
    /// Last committed primary key within `table`.
    pub last_id: Option<RecordId>,
    /// Tables finished in full.
    #[serde(default)]
    pub completed_tables: Vec<String>,
}

impl Checkpoint {
    pub fn new(job_id: Uuid, kind: JobKind, old_key: String, new_key: String) -> Self {
        Self {
            job_id,
            kind,
            old_key,
            new_key,
            table: None,
            last_id: None,
            completed_tables: Vec::new(),
        }
    }

    /// Check that `saved` was written by a job of the same kind over the same
    /// key pair as this one. Tables completed under another target key must
    /// not be skipped.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::CheckpointMismatch`] naming the difference.
    pub fn ensure_resumable(&self, saved: &Checkpoint) -> Result<(), RotationError> {
        if saved.kind != self.kind {
            return Err(RotationError::CheckpointMismatch(format!(
                "written by {:?}, this job is {:?}",
                saved.kind, self.kind
            )));
        }
        if saved.old_key != self.old_key || saved.new_key != self.new_key {
            return Err(RotationError::CheckpointMismatch(format!(
                "written for keys {} -> {}, this job uses {} -> {}",
                saved.old_key, saved.new_key, self.old_key, self.new_key
            )));
        }
        Ok(())
    }

    pub fn is_completed(&self, table: &str) -> bool {
        self.completed_tables.iter().any(|t| t == table)
    }

    /// Where to resume inside `table`: after `last_id` when this checkpoint
    /// was taken mid-table.
    pub fn resume_after(&self, table: &str) -> Option<&RecordId> {
        match &self.table {
            Some(t) if t == table => self.last_id.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn advance(&mut self, table: &str, last_id: RecordId) {
        self.table = Some(table.to_owned());
        self.last_id = Some(last_id);
    }

    pub(crate) fn complete(&mut self, table: &str) {
        if !self.is_completed(table) {
            self.completed_tables.push(table.to_owned());
        }
        self.table = None;
        self.last_id = None;
    }

    /// Read a checkpoint; `None` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Option<Self>, RotationError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| RotationError::Checkpoint(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RotationError::Io(e)),
        }
    }

    /// Write the checkpoint, replacing any previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<(), RotationError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| RotationError::Checkpoint(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}
