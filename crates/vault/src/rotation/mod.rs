//! Key rotation and bulk encryption of existing data.
//!
//! # Responsibilities
//!
//! - Walk every table with encrypted columns in keyset-ordered batches.
//! - Re-encrypt each field under the new key: legacy plaintext is encrypted,
//!   tokens under the old key are opened and re-sealed, tokens already under
//!   the new key are left alone (so a second run changes nothing).
//! - Commit per batch and record a [`Checkpoint`] so an interrupted job can
//!   resume where it stopped.
//!
//! Encrypting pre-existing plaintext is the same job with the old and new key
//! equal; see [`RotationJob::encrypt_existing`].
//!
//! # Operator procedure
//!
//! 1. Run with `dry_run` and review the report.
//! 2. Run for real, supplying an [`OperatorConfirmation`].
//! 3. Only after the report says `Completed`, point `ENCRYPTION_KEY` at the
//!    new key and restart the services.

pub mod checkpoint;
pub mod confirm;
pub mod job;

pub use checkpoint::Checkpoint;
pub use confirm::{OperatorConfirmation, ENCRYPT_PHRASE, ROTATE_PHRASE};
pub use job::RotationJob;

use common::JobState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Which table-rewriting job is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Re-encrypt from the active key to a new key.
    RotateKey,
    /// Encrypt legacy plaintext under the active key.
    EncryptExisting,
}

impl JobKind {
    /// Phrase the operator must type to confirm a writing run.
    pub fn phrase(self) -> &'static str {
        match self {
            JobKind::RotateKey => ROTATE_PHRASE,
            JobKind::EncryptExisting => ENCRYPT_PHRASE,
        }
    }
}

#[derive(Debug, Error)]
pub enum RotationError {
    /// A non-dry run was started without operator confirmation.
    #[error("operator confirmation is required for a run that writes")]
    ConfirmationRequired,

    /// The operator typed something other than the expected phrase.
    #[error("confirmation phrase did not match")]
    ConfirmationMismatch,

    /// `run` was called on a job that already ran.
    #[error("job already in state {0:?}")]
    AlreadyStarted(JobState),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid checkpoint: {0}")]
    Checkpoint(String),

    /// The checkpoint was written by a job of another kind or key pair.
    #[error("checkpoint belongs to a different job: {0}")]
    CheckpointMismatch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
