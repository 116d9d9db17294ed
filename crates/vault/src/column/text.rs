//! [`EncryptedScalar`] and [`EncryptedBlob`]: string columns.

use common::VaultError;
use serde_json::Value;

use super::context::Binding;
use super::detect::{classify, TEXT_DETECTORS};
use super::{
    physical_type_for, ColumnKind, ColumnType, CryptoContext, Dialect, EncryptedColumn,
    Inspection, StoredValue,
};
use crate::crypto::Token;

/// Bounded-length string column (names, SSNs, account numbers).
///
/// The bound applies to the plaintext; the physical column is unbounded text
/// so that tokens fit.
#[derive(Debug, Clone)]
pub struct EncryptedScalar {
    ctx: CryptoContext,
    max_length: usize,
}

impl EncryptedScalar {
    /// Adapter for plaintexts of at most `max_length` characters.
    pub fn new(ctx: CryptoContext, max_length: usize) -> Self {
        Self { ctx, max_length }
    }

    /// Declared plaintext bound.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// [`EncryptedColumn::encode`] for borrowed strings.
    pub fn encode_str(&self, plain: Option<&str>) -> Result<StoredValue, VaultError> {
        if let Some(s) = plain {
            let actual = s.chars().count();
            if actual > self.max_length {
                return Err(VaultError::ValueTooLong {
                    max: self.max_length,
                    actual,
                });
            }
        }
        encode_text(&self.ctx, plain)
    }
}

impl EncryptedColumn for EncryptedScalar {
    type Plain = String;

    fn context(&self) -> &CryptoContext {
        &self.ctx
    }

    fn encode(&self, plain: Option<&String>) -> Result<StoredValue, VaultError> {
        self.encode_str(plain.map(String::as_str))
    }

    fn passthrough(&self, physical: &StoredValue) -> Result<Option<String>, VaultError> {
        passthrough_text(physical)
    }

    fn inspect(&self, physical: &StoredValue) -> Result<Inspection<String>, VaultError> {
        classify(TEXT_DETECTORS, physical)
    }

    fn open(&self, token: &Token) -> Result<String, VaultError> {
        open_text(&self.ctx, token)
    }

    fn physical_type_for(&self, dialect: Dialect) -> ColumnType {
        physical_type_for(
            &ColumnKind::Scalar {
                max_length: self.max_length,
            },
            dialect,
        )
    }
}

/// Unbounded text column (notes, OCR output, extracted narratives).
#[derive(Debug, Clone)]
pub struct EncryptedBlob {
    ctx: CryptoContext,
}

impl EncryptedBlob {
    pub fn new(ctx: CryptoContext) -> Self {
        Self { ctx }
    }

    /// [`EncryptedColumn::encode`] for borrowed strings.
    pub fn encode_str(&self, plain: Option<&str>) -> Result<StoredValue, VaultError> {
        encode_text(&self.ctx, plain)
    }
}

impl EncryptedColumn for EncryptedBlob {
    type Plain = String;

    fn context(&self) -> &CryptoContext {
        &self.ctx
    }

    fn encode(&self, plain: Option<&String>) -> Result<StoredValue, VaultError> {
        self.encode_str(plain.map(String::as_str))
    }

    fn passthrough(&self, physical: &StoredValue) -> Result<Option<String>, VaultError> {
        passthrough_text(physical)
    }

    fn inspect(&self, physical: &StoredValue) -> Result<Inspection<String>, VaultError> {
        classify(TEXT_DETECTORS, physical)
    }

    fn open(&self, token: &Token) -> Result<String, VaultError> {
        open_text(&self.ctx, token)
    }

    fn physical_type_for(&self, dialect: Dialect) -> ColumnType {
        physical_type_for(&ColumnKind::Blob, dialect)
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn encode_text(ctx: &CryptoContext, plain: Option<&str>) -> Result<StoredValue, VaultError> {
    let Some(plain) = plain else {
        return Ok(StoredValue::Null);
    };
    if !ctx.is_enabled() {
        return Ok(StoredValue::Text(plain.to_owned()));
    }
    match ctx.bind(plain.as_bytes())? {
        Binding::Sealed(token) => Ok(StoredValue::Text(token.into_string())),
        Binding::Plaintext => Ok(StoredValue::Text(plain.to_owned())),
    }
}

fn passthrough_text(physical: &StoredValue) -> Result<Option<String>, VaultError> {
    match physical {
        StoredValue::Null => Ok(None),
        StoredValue::Text(s) => Ok(Some(s.clone())),
        StoredValue::Bytes(b) => String::from_utf8(b.clone())
            .map(Some)
            .map_err(|_| VaultError::Decode("binary value is not valid UTF-8".into())),
        StoredValue::Json(Value::String(s)) => Ok(Some(s.clone())),
        StoredValue::Json(other) => Ok(Some(other.to_string())),
    }
}

fn open_text(ctx: &CryptoContext, token: &Token) -> Result<String, VaultError> {
    let bytes = ctx.open(token)?;
    String::from_utf8(bytes)
        .map_err(|_| VaultError::Decode("decrypted value is not valid UTF-8".into()))
}
