//! [`RotationJob`]: the batch re-encryption engine.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use common::{Envelope, JobState, RotationReport, TableReport, VaultError};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{Checkpoint, JobKind, OperatorConfirmation, RotationError};
use crate::column::{
    ColumnAdapter, CryptoContext, EncryptionMode, FieldValue, Inspection, StoredValue,
};
use crate::crypto::CipherService;
use crate::keys::EncryptionKey;
use crate::schema::TableSchema;
use crate::store::{Record, RecordStore, RecordUpdate};

/// Default number of records per batch.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Adapters for one encrypted column under the old and the new key.
struct ColumnPair {
    name: String,
    old: ColumnAdapter,
    new: ColumnAdapter,
}

/// A single rotation (or bulk encryption) run over a set of tables.
///
/// `NotStarted → Running → Completed | Failed`. A job runs once.
pub struct RotationJob {
    id: Uuid,
    kind: JobKind,
    store: Arc<dyn RecordStore>,
    tables: Vec<Arc<TableSchema>>,
    old_ctx: CryptoContext,
    new_ctx: CryptoContext,
    old_fingerprint: String,
    new_fingerprint: String,
    batch_size: usize,
    dry_run: bool,
    checkpoint_path: Option<PathBuf>,
    checkpoint: Checkpoint,
    state: JobState,
}

impl std::fmt::Debug for RotationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationJob")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("old_key", &self.old_fingerprint)
            .field("new_key", &self.new_fingerprint)
            .field("batch_size", &self.batch_size)
            .field("dry_run", &self.dry_run)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RotationJob {
    /// Re-encrypt every encrypted field of `tables` from `old_key` to
    /// `new_key`. Tables are processed in the order given.
    pub fn new(
        store: Arc<dyn RecordStore>,
        tables: Vec<Arc<TableSchema>>,
        old_key: EncryptionKey,
        new_key: EncryptionKey,
    ) -> Self {
        Self::build(JobKind::RotateKey, store, tables, old_key, new_key)
    }

    /// Encrypt legacy plaintext in place under `key`.
    pub fn encrypt_existing(
        store: Arc<dyn RecordStore>,
        tables: Vec<Arc<TableSchema>>,
        key: EncryptionKey,
    ) -> Self {
        Self::build(JobKind::EncryptExisting, store, tables, key.clone(), key)
    }

    fn build(
        kind: JobKind,
        store: Arc<dyn RecordStore>,
        tables: Vec<Arc<TableSchema>>,
        old_key: EncryptionKey,
        new_key: EncryptionKey,
    ) -> Self {
        let id = Uuid::new_v4();
        let old_fingerprint = old_key.fingerprint();
        let new_fingerprint = new_key.fingerprint();
        let checkpoint = Checkpoint::new(id, kind, old_fingerprint.clone(), new_fingerprint.clone());
        Self {
            id,
            kind,
            store,
            tables,
            old_ctx: strict_context(old_key),
            new_ctx: strict_context(new_key),
            old_fingerprint,
            new_fingerprint,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
            checkpoint_path: None,
            checkpoint,
            state: JobState::NotStarted,
        }
    }

    /// Records loaded and committed together. Zero is treated as one.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run the full read/decrypt/re-encrypt logic but write nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Persist the checkpoint to `path` after every committed batch.
    pub fn checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    /// Continue an interrupted job: completed tables are skipped and the
    /// table in progress resumes after the last committed key.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::CheckpointMismatch`] when `checkpoint` was
    /// written by a job of another kind or over another key pair.
    pub fn resume_from(mut self, checkpoint: Checkpoint) -> Result<Self, RotationError> {
        self.checkpoint.ensure_resumable(&checkpoint)?;
        self.id = checkpoint.job_id;
        self.checkpoint = checkpoint;
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Progress as of the last committed batch.
    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Execute the job.
    ///
    /// Store and checkpoint failures end the job in [`JobState::Failed`]; the
    /// report is still returned, and the checkpoint reflects the last
    /// committed batch.
    ///
    /// # Errors
    ///
    /// Returns [`RotationError::ConfirmationRequired`] for a writing run
    /// without confirmation and [`RotationError::AlreadyStarted`] when the
    /// job has already run.
    pub async fn run(
        &mut self,
        confirmation: Option<&OperatorConfirmation>,
    ) -> Result<RotationReport, RotationError> {
        if self.state != JobState::NotStarted {
            return Err(RotationError::AlreadyStarted(self.state));
        }
        if !self.dry_run && confirmation.is_none() {
            return Err(RotationError::ConfirmationRequired);
        }

        self.state = JobState::Running;
        let mut report = RotationReport::new(self.id, self.dry_run);
        report.state = JobState::Running;
        info!(
            job_id = %self.id,
            kind = ?self.kind,
            old_key = %self.old_fingerprint,
            new_key = %self.new_fingerprint,
            dry_run = self.dry_run,
            batch_size = self.batch_size,
            "rotation job started"
        );

        let tables = self.tables.clone();
        for table in &tables {
            if !table.has_encrypted_columns() {
                debug!(table = %table.name, "no encrypted columns; skipping");
                continue;
            }
            if self.checkpoint.is_completed(&table.name) {
                info!(table = %table.name, "completed in a previous run; skipping");
                continue;
            }

            let mut counters = TableReport::new(&table.name);
            let outcome = self.rotate_table(table, &mut counters).await;
            report.tables.push(counters);

            if let Err(e) = outcome {
                error!(
                    job_id = %self.id,
                    table = %table.name,
                    error = %e,
                    "rotation job failed"
                );
                self.state = JobState::Failed;
                report.state = JobState::Failed;
                report.error = Some(e.to_string());
                return Ok(report);
            }
        }

        self.state = JobState::Completed;
        report.state = JobState::Completed;
        info!(
            job_id = %self.id,
            visited = report.total_visited(),
            re_encrypted = report.total_re_encrypted(),
            failed = report.total_failed(),
            dry_run = self.dry_run,
            "rotation job completed"
        );
        Ok(report)
    }

    async fn rotate_table(
        &mut self,
        table: &TableSchema,
        counters: &mut TableReport,
    ) -> Result<(), RotationError> {
        let columns: Vec<ColumnPair> = table
            .encrypted_columns()
            .filter_map(|(name, kind)| {
                Some(ColumnPair {
                    name: name.to_owned(),
                    old: ColumnAdapter::for_kind(kind, self.old_ctx.clone())?,
                    new: ColumnAdapter::for_kind(kind, self.new_ctx.clone())?,
                })
            })
            .collect();
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

        let mut after = self.checkpoint.resume_after(&table.name).cloned();
        match &after {
            Some(id) => info!(table = %table.name, resume_after = %id, "resuming table"),
            None => info!(table = %table.name, columns = names.len(), "rotating table"),
        }

        loop {
            let batch = self
                .store
                .load_batch(
                    &table.name,
                    &table.primary_key,
                    &names,
                    after.as_ref(),
                    self.batch_size,
                )
                .await?;
            let Some(last_id) = batch.last().map(|r| r.id.clone()) else {
                break;
            };

            let mut staged = Vec::new();
            for record in &batch {
                counters.visited += 1;
                match rotate_record(&columns, record) {
                    Ok(values) if values.is_empty() => counters.unchanged += 1,
                    Ok(values) => {
                        counters.re_encrypted += 1;
                        staged.push(RecordUpdate {
                            id: record.id.clone(),
                            values,
                        });
                    }
                    Err((column, e)) => {
                        counters.failed += 1;
                        warn!(
                            job_id = %self.id,
                            table = %table.name,
                            record_id = %record.id,
                            column = %column,
                            code = e.code(),
                            "record skipped: field could not be re-encrypted"
                        );
                    }
                }
            }

            if !self.dry_run {
                if !staged.is_empty() {
                    self.store
                        .write_batch(&table.name, &table.primary_key, &staged)
                        .await?;
                }
                self.checkpoint.advance(&table.name, last_id.clone());
                self.save_checkpoint().await?;
            }
            debug!(
                table = %table.name,
                records = batch.len(),
                staged = staged.len(),
                last_id = %last_id,
                "batch processed"
            );

            let exhausted = batch.len() < self.batch_size;
            after = Some(last_id);
            if exhausted {
                break;
            }
        }

        if !self.dry_run {
            self.checkpoint.complete(&table.name);
            self.save_checkpoint().await?;
        }
        info!(
            table = %table.name,
            visited = counters.visited,
            re_encrypted = counters.re_encrypted,
            unchanged = counters.unchanged,
            failed = counters.failed,
            "table finished"
        );
        Ok(())
    }

    async fn save_checkpoint(&self) -> Result<(), RotationError> {
        match &self.checkpoint_path {
            Some(path) => self.checkpoint.save(path).await,
            None => Ok(()),
        }
    }
}

fn strict_context(key: EncryptionKey) -> CryptoContext {
    CryptoContext::new(
        Arc::new(CipherService::new(key, true)),
        EncryptionMode::STRICT,
    )
}

/// New values for the fields of `record` that need rewriting. A failure on
/// any field fails the whole record.
fn rotate_record(
    columns: &[ColumnPair],
    record: &Record,
) -> Result<BTreeMap<String, StoredValue>, (String, VaultError)> {
    let mut values = BTreeMap::new();
    for column in columns {
        let current = record.values.get(&column.name).unwrap_or(&StoredValue::Null);
        match rotate_field(column, current) {
            Ok(Some(rewritten)) => {
                values.insert(column.name.clone(), rewritten);
            }
            Ok(None) => {}
            Err(e) => return Err((column.name.clone(), e)),
        }
    }
    Ok(values)
}

/// `None` when the stored value is already current under the new key.
fn rotate_field(
    column: &ColumnPair,
    current: &StoredValue,
) -> Result<Option<StoredValue>, VaultError> {
    match column.new.inspect(current)? {
        Inspection::Null | Inspection::Legacy(FieldValue::Document(Value::Null)) => Ok(None),
        Inspection::Legacy(plain) => column.new.encode(&plain).map(Some),
        Inspection::Sealed(token) => match column.new.open(&token) {
            Ok(_) if is_canonical(&column.new, current) => Ok(None),
            Ok(plain) => column.new.encode(&plain).map(Some),
            Err(VaultError::InvalidToken) => {
                let plain = column.old.open(&token)?;
                column.new.encode(&plain).map(Some)
            }
            Err(e) => Err(e),
        },
    }
}

/// Document tokens belong in an envelope; a bare token left by an earlier
/// migration is rewrapped.
fn is_canonical(adapter: &ColumnAdapter, stored: &StoredValue) -> bool {
    if !matches!(adapter, ColumnAdapter::Document(_)) {
        return true;
    }
    let json = match stored {
        StoredValue::Json(v) => Some(v.clone()),
        StoredValue::Text(s) => serde_json::from_str(s).ok(),
        StoredValue::Bytes(b) => serde_json::from_slice(b).ok(),
        StoredValue::Null => None,
    };
    json.as_ref().and_then(Envelope::from_value).is_some()
}
