//! [`EncryptionKey`]: the 32-byte secret every token is sealed under.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use base64::{
    alphabet,
    engine::{general_purpose::URL_SAFE, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Accepts the textual key with or without trailing `=` padding.
const KEY_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors produced while parsing key material.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The textual key is not base64url.
    #[error("key is not valid base64url")]
    Encoding,

    /// The decoded key material has an unexpected length.
    #[error("key has invalid length: expected {KEY_LEN} bytes, got {0}")]
    InvalidLength(usize),
}

/// Fixed-size key buffer that holds exactly [`KEY_LEN`] bytes.
///
/// When this type is dropped, the memory is overwritten with zeroes to
/// minimise the window during which plaintext key material lives in RAM.
#[derive(Clone)]
pub struct EncryptionKey(Box<[u8; KEY_LEN]>);

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.iter_mut().for_each(|b| *b = 0);
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never reach logs, including debug output.
        write!(f, "EncryptionKey([REDACTED] {})", self.fingerprint())
    }
}

impl EncryptionKey {
    /// Generate a fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut buf = Box::new([0u8; KEY_LEN]);
        OsRng.fill_bytes(&mut buf[..]);
        Self(buf)
    }

    /// Take ownership of raw key bytes.
    pub fn from_array(bytes: [u8; KEY_LEN]) -> Self {
        Self(Box::new(bytes))
    }

    /// Copy key material out of a slice.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] unless the slice is exactly
    /// [`KEY_LEN`] bytes. Short or long input is never padded or truncated.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != KEY_LEN {
            return Err(KeyError::InvalidLength(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Parse the base64url textual form used in configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Encoding`] for non-base64url input and
    /// [`KeyError::InvalidLength`] when the decoded length is wrong.
    pub fn from_encoded(encoded: &str) -> Result<Self, KeyError> {
        let mut raw = KEY_DECODER
            .decode(encoded.trim())
            .map_err(|_| KeyError::Encoding)?;
        let key = Self::from_bytes(&raw);
        raw.iter_mut().for_each(|b| *b = 0);
        key
    }

    /// Padded base64url form, suitable for `ENCRYPTION_KEY`.
    pub fn to_encoded(&self) -> String {
        URL_SAFE.encode(&self.0[..])
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Short, non-reversible identifier safe to log: the first 8 bytes of
    /// SHA-256 over the key, hex encoded.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.0[..]);
        hex::encode(&digest[..8])
    }
}
