//! Error taxonomy surfaced by the column adapters.

use thiserror::Error;

/// Failure raised while binding a value to, or reading a value from, an
/// encrypted column.
///
/// A null value is never an error: null always passes through untouched.
/// "Encryption is switched off" is not an error either; the cipher reports it
/// as a sentinel and the adapter decides what to do with it.
///
/// Machine codes returned by [`VaultError::code`]:
/// - [`VaultError::Encryption`] → `encryption_failed`
/// - [`VaultError::InvalidToken`] → `invalid_token`
/// - [`VaultError::Decode`] → `decode_failed`
/// - [`VaultError::ValueTooLong`] → `value_too_long`
#[derive(Debug, Error)]
pub enum VaultError {
    /// Encryption was mandatory (strict mode) and could not be performed.
    #[error("encryption failure: {0}")]
    Encryption(String),

    /// A stored token failed authentication: it was tampered with or sealed
    /// under a different key.
    #[error("invalid token: integrity check failed")]
    InvalidToken,

    /// The stored value is neither a valid token nor readable plaintext.
    #[error("decode failure: {0}")]
    Decode(String),

    /// A bounded scalar exceeded its declared length.
    #[error("value too long: {actual} characters exceeds limit of {max}")]
    ValueTooLong {
        /// Declared column bound.
        max: usize,
        /// Length of the rejected value.
        actual: usize,
    },
}

impl VaultError {
    /// Returns a short machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Encryption(_) => "encryption_failed",
            VaultError::InvalidToken => "invalid_token",
            VaultError::Decode(_) => "decode_failed",
            VaultError::ValueTooLong { .. } => "value_too_long",
        }
    }

    /// Returns `true` for failures of the integrity check on read.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, VaultError::InvalidToken)
    }
}
