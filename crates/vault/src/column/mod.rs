//! Column adapters: transparent encryption at bind time, decryption at result
//! time.
//!
//! A persistence layer keeps one adapter per encrypted field and routes every
//! write through [`EncryptedColumn::encode`] and every read through
//! [`EncryptedColumn::decode`]. Adapters perform no I/O; they run inline in
//! the caller's transaction, so an encode error aborts that write.
//!
//! # Grace period
//!
//! Values written before encryption was enabled keep reading back unchanged:
//! decode classifies each physical value with an ordered list of detectors
//! (see `detect`) and only sends recognised tokens to the cipher.

pub mod context;
pub(crate) mod detect;
pub mod document;
pub mod storage;
pub mod text;

pub use context::{CryptoContext, EncryptionMode};
pub use document::EncryptedDocument;
pub use storage::{physical_type_for, ColumnType, Dialect};
pub use text::{EncryptedBlob, EncryptedScalar};

use common::VaultError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::Token;

/// A value as the persistence layer binds it to, or reads it from, a column.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Null,
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl StoredValue {
    /// Short description of the value's shape, safe to log.
    pub fn shape(&self) -> &'static str {
        match self {
            StoredValue::Null => "null",
            StoredValue::Text(_) => "text value",
            StoredValue::Bytes(_) => "binary value",
            StoredValue::Json(_) => "json value",
        }
    }

    /// `true` for [`StoredValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, StoredValue::Null)
    }
}

/// Classification of a persisted attribute, fixed at schema-design time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ColumnKind {
    Plain,
    Scalar { max_length: usize },
    Blob,
    Document,
}

impl ColumnKind {
    /// Whether values in this column go through an adapter.
    pub fn is_encrypted(&self) -> bool {
        !matches!(self, ColumnKind::Plain)
    }
}

/// What the detectors found in a physical value.
#[derive(Debug, Clone, PartialEq)]
pub enum Inspection<T> {
    Null,
    /// Plaintext written before encryption was enabled.
    Legacy(T),
    Sealed(Token),
}

/// Bind-time and result-time behaviour shared by the three adapters.
pub trait EncryptedColumn {
    /// The application-facing value type.
    type Plain;

    /// The context the adapter was built with.
    fn context(&self) -> &CryptoContext;

    /// Prepare `plain` for storage. `None` binds SQL null.
    ///
    /// # Errors
    ///
    /// [`VaultError::Encryption`] in strict mode when sealing fails, and
    /// [`VaultError::ValueTooLong`] for over-long scalars.
    fn encode(&self, plain: Option<&Self::Plain>) -> Result<StoredValue, VaultError>;

    /// Read a physical value without involving the cipher (encryption
    /// disabled).
    ///
    /// # Errors
    ///
    /// [`VaultError::Decode`] when the value cannot be interpreted as text.
    fn passthrough(&self, physical: &StoredValue) -> Result<Option<Self::Plain>, VaultError>;

    /// Classify a physical value without involving the cipher.
    ///
    /// # Errors
    ///
    /// [`VaultError::Decode`] when no detector recognises the value.
    fn inspect(&self, physical: &StoredValue) -> Result<Inspection<Self::Plain>, VaultError>;

    /// Decrypt a token recovered by [`EncryptedColumn::inspect`].
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidToken`] when authentication fails.
    fn open(&self, token: &Token) -> Result<Self::Plain, VaultError>;

    /// Physical column type for `dialect`.
    fn physical_type_for(&self, dialect: Dialect) -> ColumnType;

    /// Recover the application value from a physical value.
    ///
    /// # Errors
    ///
    /// [`VaultError::InvalidToken`] for tokens that fail authentication and
    /// [`VaultError::Decode`] for values that are neither tokens nor
    /// plaintext.
    fn decode(&self, physical: &StoredValue) -> Result<Option<Self::Plain>, VaultError> {
        if !self.context().is_enabled() {
            return self.passthrough(physical);
        }
        match self.inspect(physical)? {
            Inspection::Null => Ok(None),
            Inspection::Legacy(plain) => Ok(Some(plain)),
            Inspection::Sealed(token) => self.open(&token).map(Some),
        }
    }
}

/// Adapter-neutral plaintext, used where the column kind is only known at
/// runtime (rotation).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Document(Value),
}

/// Runtime dispatch over the three adapters.
#[derive(Debug, Clone)]
pub enum ColumnAdapter {
    Scalar(EncryptedScalar),
    Blob(EncryptedBlob),
    Document(EncryptedDocument),
}

impl ColumnAdapter {
    /// Build the adapter for `kind`; `None` for plain columns.
    pub fn for_kind(kind: &ColumnKind, ctx: CryptoContext) -> Option<Self> {
        match kind {
            ColumnKind::Plain => None,
            ColumnKind::Scalar { max_length } => {
                Some(ColumnAdapter::Scalar(EncryptedScalar::new(ctx, *max_length)))
            }
            ColumnKind::Blob => Some(ColumnAdapter::Blob(EncryptedBlob::new(ctx))),
            ColumnKind::Document => Some(ColumnAdapter::Document(EncryptedDocument::new(ctx))),
        }
    }

    /// See [`EncryptedColumn::inspect`].
    pub fn inspect(&self, physical: &StoredValue) -> Result<Inspection<FieldValue>, VaultError> {
        Ok(match self {
            ColumnAdapter::Scalar(a) => map_inspection(a.inspect(physical)?, FieldValue::Text),
            ColumnAdapter::Blob(a) => map_inspection(a.inspect(physical)?, FieldValue::Text),
            ColumnAdapter::Document(a) => {
                map_inspection(a.inspect(physical)?, FieldValue::Document)
            }
        })
    }

    /// See [`EncryptedColumn::open`].
    pub fn open(&self, token: &Token) -> Result<FieldValue, VaultError> {
        match self {
            ColumnAdapter::Scalar(a) => a.open(token).map(FieldValue::Text),
            ColumnAdapter::Blob(a) => a.open(token).map(FieldValue::Text),
            ColumnAdapter::Document(a) => a.open(token).map(FieldValue::Document),
        }
    }

    /// See [`EncryptedColumn::decode`].
    pub fn decode(&self, physical: &StoredValue) -> Result<Option<FieldValue>, VaultError> {
        match self {
            ColumnAdapter::Scalar(a) => Ok(a.decode(physical)?.map(FieldValue::Text)),
            ColumnAdapter::Blob(a) => Ok(a.decode(physical)?.map(FieldValue::Text)),
            ColumnAdapter::Document(a) => Ok(a.decode(physical)?.map(FieldValue::Document)),
        }
    }

    /// See [`EncryptedColumn::encode`]. Text given to a document column is
    /// stored as a JSON string; a document given to a text column is stored
    /// as its JSON text.
    pub fn encode(&self, plain: &FieldValue) -> Result<StoredValue, VaultError> {
        match (self, plain) {
            (ColumnAdapter::Scalar(a), FieldValue::Text(s)) => a.encode(Some(s)),
            (ColumnAdapter::Scalar(a), FieldValue::Document(v)) => a.encode(Some(&v.to_string())),
            (ColumnAdapter::Blob(a), FieldValue::Text(s)) => a.encode(Some(s)),
            (ColumnAdapter::Blob(a), FieldValue::Document(v)) => a.encode(Some(&v.to_string())),
            (ColumnAdapter::Document(a), FieldValue::Document(v)) => a.encode(Some(v)),
            (ColumnAdapter::Document(a), FieldValue::Text(s)) => {
                a.encode(Some(&Value::String(s.clone())))
            }
        }
    }

    /// See [`EncryptedColumn::physical_type_for`].
    pub fn physical_type_for(&self, dialect: Dialect) -> ColumnType {
        match self {
            ColumnAdapter::Scalar(a) => a.physical_type_for(dialect),
            ColumnAdapter::Blob(a) => a.physical_type_for(dialect),
            ColumnAdapter::Document(a) => a.physical_type_for(dialect),
        }
    }
}

fn map_inspection<T, U>(found: Inspection<T>, f: impl FnOnce(T) -> U) -> Inspection<U> {
    match found {
        Inspection::Null => Inspection::Null,
        Inspection::Legacy(plain) => Inspection::Legacy(f(plain)),
        Inspection::Sealed(token) => Inspection::Sealed(token),
    }
}
