//! [`EncryptedDocument`]: JSON-typed columns (borrower profiles, extracted
//! financial data).
//!
//! The whole document is serialised and sealed, and the token is stored in a
//! small envelope so the column keeps a valid JSON value:
//!
//! ```json
//! {"_encrypted": true, "_data": "<standard base64 of the token text>"}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::{Envelope, VaultError};
use serde_json::Value;

use super::context::Binding;
use super::detect::{classify, DOCUMENT_DETECTORS};
use super::{
    physical_type_for, ColumnKind, ColumnType, CryptoContext, Dialect, EncryptedColumn,
    Inspection, StoredValue,
};
use crate::crypto::Token;

#[derive(Debug, Clone)]
pub struct EncryptedDocument {
    ctx: CryptoContext,
}

impl EncryptedDocument {
    pub fn new(ctx: CryptoContext) -> Self {
        Self { ctx }
    }
}

impl EncryptedColumn for EncryptedDocument {
    type Plain = Value;

    fn context(&self) -> &CryptoContext {
        &self.ctx
    }

    fn encode(&self, plain: Option<&Value>) -> Result<StoredValue, VaultError> {
        let doc = match plain {
            None | Some(Value::Null) => return Ok(StoredValue::Null),
            Some(doc) => doc,
        };
        if !self.ctx.is_enabled() {
            return Ok(StoredValue::Json(doc.clone()));
        }
        let bytes = serde_json::to_vec(doc).map_err(|e| VaultError::Encryption(e.to_string()))?;
        match self.ctx.bind(&bytes)? {
            Binding::Sealed(token) => {
                let envelope = Envelope::new(STANDARD.encode(token.as_str()));
                Ok(StoredValue::Json(envelope.to_value()))
            }
            Binding::Plaintext => Ok(StoredValue::Json(doc.clone())),
        }
    }

    fn passthrough(&self, physical: &StoredValue) -> Result<Option<Value>, VaultError> {
        match physical {
            StoredValue::Null => Ok(None),
            StoredValue::Json(v) => Ok(Some(v.clone())),
            StoredValue::Text(s) => Ok(Some(
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            )),
            StoredValue::Bytes(b) => {
                let text = std::str::from_utf8(b)
                    .map_err(|_| VaultError::Decode("binary value is not valid UTF-8".into()))?;
                Ok(Some(
                    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned())),
                ))
            }
        }
    }

    fn inspect(&self, physical: &StoredValue) -> Result<Inspection<Value>, VaultError> {
        classify(DOCUMENT_DETECTORS, physical)
    }

    /// Tokens that carried raw text rather than JSON come back as a JSON
    /// string.
    fn open(&self, token: &Token) -> Result<Value, VaultError> {
        let bytes = self.ctx.open(token)?;
        let text = String::from_utf8(bytes)
            .map_err(|_| VaultError::Decode("decrypted document is not valid UTF-8".into()))?;
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    fn physical_type_for(&self, dialect: Dialect) -> ColumnType {
        physical_type_for(&ColumnKind::Document, dialect)
    }
}
