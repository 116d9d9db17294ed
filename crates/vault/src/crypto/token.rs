//! The [`Token`] wire format.
//!
//! ```text
//! base64url-no-pad( version(1) ‖ timestamp(8, BE secs) ‖ nonce(12) ‖ ciphertext ‖ tag(16) )
//! ```
//!
//! The first [`HEADER_LEN`] bytes are bound to the ciphertext as AEAD
//! associated data, so the version, timestamp, ciphertext and tag are
//! authenticated together.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use super::cipher::CipherError;

/// Format marker carried in the first byte of every token.
pub const TOKEN_VERSION: u8 = 0x81;

/// Byte length of the big-endian seconds timestamp.
pub const TIMESTAMP_LEN: usize = 8;

/// Byte length of an AES-GCM-SIV nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the AES-GCM-SIV authentication tag.
pub const TAG_LEN: usize = 16;

/// Version + timestamp + nonce.
pub const HEADER_LEN: usize = 1 + TIMESTAMP_LEN + NONCE_LEN;

/// Smallest possible token: header plus tag over an empty plaintext.
pub const MIN_TOKEN_LEN: usize = HEADER_LEN + TAG_LEN;

/// Leading characters shared by every token minted before the year 36812.
pub const TOKEN_PREFIX: &str = "gQAAAA";

/// Textual length of a [`MIN_TOKEN_LEN`]-byte token.
pub const MIN_ENCODED_LEN: usize = (MIN_TOKEN_LEN * 4 + 2) / 3;

/// Outcome of [`Token::detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detected {
    /// Structurally a token; authenticity is still unchecked.
    Token(Token),
    /// Carries the token signature but is truncated or corrupted.
    Damaged,
    /// Not a token.
    Absent,
}

/// An encrypted value, in both its textual and raw forms.
///
/// A `Token` can only be built by sealing or by [`Token::parse`], so holding
/// one means the structure (not the authenticity) has been checked.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    encoded: String,
    raw: Vec<u8>,
}

impl Token {
    pub(crate) fn assemble(timestamp: u64, nonce: &[u8; NONCE_LEN], sealed: Vec<u8>) -> Self {
        let mut raw = Vec::with_capacity(HEADER_LEN + sealed.len());
        raw.extend_from_slice(&header(timestamp, nonce));
        raw.extend_from_slice(&sealed);
        let encoded = URL_SAFE_NO_PAD.encode(&raw);
        Self { encoded, raw }
    }

    /// Parse the textual form of a token.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MalformedToken`] if the text is not base64url,
    /// is too short, or carries an unknown version byte.
    pub fn parse(encoded: &str) -> Result<Self, CipherError> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| CipherError::MalformedToken)?;
        if raw.len() < MIN_TOKEN_LEN || raw[0] != TOKEN_VERSION {
            return Err(CipherError::MalformedToken);
        }
        Ok(Self {
            encoded: encoded.to_owned(),
            raw,
        })
    }

    /// Definite structural verdict on a value read from a column.
    ///
    /// The signature is the decoded version byte, not the textual prefix: the
    /// second character of a token already depends on the timestamp, so a
    /// flipped header bit must still be recognised and sent to the cipher.
    pub fn detect(candidate: &str) -> Detected {
        match URL_SAFE_NO_PAD.decode(candidate) {
            Ok(raw) if raw.first() == Some(&TOKEN_VERSION) => {
                if raw.len() >= MIN_TOKEN_LEN {
                    Detected::Token(Self {
                        encoded: candidate.to_owned(),
                        raw,
                    })
                } else if raw.len() >= HEADER_LEN {
                    Detected::Damaged
                } else {
                    Detected::Absent
                }
            }
            Ok(_) => Detected::Absent,
            Err(_) if candidate.starts_with(TOKEN_PREFIX) && candidate.len() >= MIN_ENCODED_LEN => {
                Detected::Damaged
            }
            Err(_) => Detected::Absent,
        }
    }

    /// The ASCII form stored in columns and files.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    /// Consume the token, returning its ASCII form.
    pub fn into_string(self) -> String {
        self.encoded
    }

    /// Seconds since the Unix epoch at which the token was sealed.
    pub fn timestamp(&self) -> u64 {
        let mut buf = [0u8; TIMESTAMP_LEN];
        buf.copy_from_slice(&self.raw[1..1 + TIMESTAMP_LEN]);
        u64::from_be_bytes(buf)
    }

    pub(crate) fn header(&self) -> &[u8] {
        &self.raw[..HEADER_LEN]
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.raw[1 + TIMESTAMP_LEN..HEADER_LEN]
    }

    /// Ciphertext followed by the authentication tag.
    pub(crate) fn sealed(&self) -> &[u8] {
        &self.raw[HEADER_LEN..]
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

pub(crate) fn header(timestamp: u64, nonce: &[u8; NONCE_LEN]) -> [u8; HEADER_LEN] {
    let mut out = [0u8; HEADER_LEN];
    out[0] = TOKEN_VERSION;
    out[1..1 + TIMESTAMP_LEN].copy_from_slice(&timestamp.to_be_bytes());
    out[1 + TIMESTAMP_LEN..].copy_from_slice(nonce);
    out
}
