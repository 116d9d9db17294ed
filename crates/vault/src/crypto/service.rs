//! [`CipherService`]: the active key bound to the AEAD primitive.
//!
//! Constructed once at startup and shared read-only (`Arc<CipherService>`)
//! across every worker; it holds no mutable state.

use std::fs;
use std::path::{Path, PathBuf};

use aes_gcm_siv::Aes256GcmSiv;
use serde_json::Value;
use tracing::debug;

use super::cipher::{self, CipherError};
use super::kdf::{self, DerivedKey};
use super::token::Token;
use crate::config::Config;
use crate::keys::{self, EncryptionKey, KeySource};

/// Suffix appended by [`CipherService::encrypt_file`] when no destination is given.
pub const ENCRYPTED_FILE_SUFFIX: &str = "enc";

/// Suffix appended by [`CipherService::decrypt_file`] when the source has no
/// [`ENCRYPTED_FILE_SUFFIX`] to strip.
pub const DECRYPTED_FILE_SUFFIX: &str = "dec";

/// A value in one of the shapes the cipher accepts and recovers.
#[derive(Debug, Clone, PartialEq)]
pub enum PlainValue {
    Bytes(Vec<u8>),
    Text(String),
    /// A JSON map or list.
    Document(Value),
}

impl PlainValue {
    /// Canonical byte form: UTF-8 for text, compact `serde_json` for documents
    /// (object keys are emitted in sorted order).
    fn to_canonical_bytes(&self) -> Result<Vec<u8>, CipherError> {
        match self {
            PlainValue::Bytes(b) => Ok(b.clone()),
            PlainValue::Text(s) => Ok(s.as_bytes().to_vec()),
            PlainValue::Document(v) => serde_json::to_vec(v).map_err(|_| CipherError::Encryption),
        }
    }

    /// Escalate recovered bytes to the most specific shape they parse as.
    fn from_recovered(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(doc @ (Value::Object(_) | Value::Array(_))) => PlainValue::Document(doc),
                _ => PlainValue::Text(text),
            },
            Err(e) => PlainValue::Bytes(e.into_bytes()),
        }
    }
}

impl From<&str> for PlainValue {
    fn from(s: &str) -> Self {
        PlainValue::Text(s.to_owned())
    }
}

impl From<String> for PlainValue {
    fn from(s: String) -> Self {
        PlainValue::Text(s)
    }
}

impl From<Vec<u8>> for PlainValue {
    fn from(b: Vec<u8>) -> Self {
        PlainValue::Bytes(b)
    }
}

impl From<Value> for PlainValue {
    fn from(v: Value) -> Self {
        PlainValue::Document(v)
    }
}

/// Outcome of a sealing request.
///
/// `Disabled` is a legitimate signal, not a failure: the service was built
/// with encryption switched off and produced nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sealed {
    Token(Token),
    Disabled,
}

impl Sealed {
    /// The token, if one was produced.
    pub fn token(self) -> Option<Token> {
        match self {
            Sealed::Token(t) => Some(t),
            Sealed::Disabled => None,
        }
    }
}

/// Byte-level seam between the column adapters and the cipher.
#[cfg_attr(test, mockall::automock)]
pub trait FieldCipher: Send + Sync {
    /// Seal raw bytes.
    fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CipherError>;

    /// Open a token back to raw bytes.
    fn open(&self, token: &Token) -> Result<Vec<u8>, CipherError>;
}

/// Encryption service bound to a single active key.
pub struct CipherService {
    key: EncryptionKey,
    aead: Aes256GcmSiv,
    enabled: bool,
}

impl std::fmt::Debug for CipherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherService")
            .field("key", &self.key.fingerprint())
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl CipherService {
    /// Bind `key`. When `enabled` is `false`, [`CipherService::encrypt`]
    /// answers [`Sealed::Disabled`].
    pub fn new(key: EncryptionKey, enabled: bool) -> Self {
        let aead = cipher::build_cipher(&key);
        Self { key, aead, enabled }
    }

    /// Build the service from configuration, resolving (or generating) the
    /// active key.
    pub fn from_config(cfg: &Config) -> (Self, KeySource) {
        let (key, source) = keys::resolve_key(cfg.encryption_key.as_deref());
        (Self::new(key, cfg.encryption_enabled), source)
    }

    /// Whether [`CipherService::encrypt`] produces tokens.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Loggable identifier of the active key.
    pub fn key_fingerprint(&self) -> String {
        self.key.fingerprint()
    }

    /// Generate a fresh random key.
    pub fn generate_key() -> EncryptionKey {
        EncryptionKey::generate()
    }

    /// Derive a key from a password; see [`kdf::derive_key`].
    ///
    /// # Errors
    ///
    /// Propagates [`CipherError`] from the derivation.
    pub fn derive_key(password: &str, salt: Option<&[u8]>) -> Result<DerivedKey, CipherError> {
        kdf::derive_key(password, salt)
    }

    /// Encrypt a value of any supported shape.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if the primitive fails.
    pub fn encrypt(&self, value: &PlainValue) -> Result<Sealed, CipherError> {
        if !self.enabled {
            return Ok(Sealed::Disabled);
        }
        let bytes = value.to_canonical_bytes()?;
        cipher::seal(&self.aead, &bytes).map(Sealed::Token)
    }

    /// Encrypt raw bytes.
    pub fn encrypt_bytes(&self, bytes: &[u8]) -> Result<Sealed, CipherError> {
        if !self.enabled {
            return Ok(Sealed::Disabled);
        }
        cipher::seal(&self.aead, bytes).map(Sealed::Token)
    }

    /// Encrypt a string.
    pub fn encrypt_str(&self, text: &str) -> Result<Sealed, CipherError> {
        self.encrypt_bytes(text.as_bytes())
    }

    /// Encrypt a JSON map or list.
    pub fn encrypt_json(&self, doc: &Value) -> Result<Sealed, CipherError> {
        self.encrypt(&PlainValue::Document(doc.clone()))
    }

    /// Decrypt a token, returning the most specific shape the plaintext
    /// parses as: document, then text, then bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidToken`] if authentication fails.
    pub fn decrypt(&self, token: &Token) -> Result<PlainValue, CipherError> {
        self.decrypt_bytes(token).map(PlainValue::from_recovered)
    }

    /// Decrypt a token to raw bytes without any interpretation.
    pub fn decrypt_bytes(&self, token: &Token) -> Result<Vec<u8>, CipherError> {
        cipher::open(&self.aead, token)
    }

    /// Parse and decrypt the textual form of a token.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MalformedToken`] for non-token input and
    /// [`CipherError::InvalidToken`] if authentication fails.
    pub fn decrypt_encoded(&self, encoded: &str) -> Result<PlainValue, CipherError> {
        self.decrypt(&Token::parse(encoded)?)
    }

    /// Encrypt the whole contents of `src` into a sibling file.
    ///
    /// Writes to `dst`, or to `src` with `.enc` appended. Runs regardless of
    /// the enabled flag: the caller asked for this file to be sealed.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Io`] on filesystem failure.
    pub fn encrypt_file(&self, src: &Path, dst: Option<&Path>) -> Result<PathBuf, CipherError> {
        let out = dst
            .map(Path::to_path_buf)
            .unwrap_or_else(|| with_suffix(src, ENCRYPTED_FILE_SUFFIX));
        let contents = fs::read(src)?;
        let token = cipher::seal(&self.aead, &contents)?;
        fs::write(&out, token.as_str())?;
        debug!(src = %src.display(), dst = %out.display(), "file encrypted");
        Ok(out)
    }

    /// Decrypt a file produced by [`CipherService::encrypt_file`].
    ///
    /// Writes to `dst`, or to `src` with `.enc` stripped (`.dec` appended when
    /// there is nothing to strip).
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::MalformedToken`] if the file does not hold a
    /// token, [`CipherError::InvalidToken`] if authentication fails, and
    /// [`CipherError::Io`] on filesystem failure.
    pub fn decrypt_file(&self, src: &Path, dst: Option<&Path>) -> Result<PathBuf, CipherError> {
        let out = match dst {
            Some(d) => d.to_path_buf(),
            None => match src.extension() {
                Some(ext) if ext == ENCRYPTED_FILE_SUFFIX => src.with_extension(""),
                _ => with_suffix(src, DECRYPTED_FILE_SUFFIX),
            },
        };
        let text = fs::read_to_string(src).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => CipherError::MalformedToken,
            _ => CipherError::Io(e),
        })?;
        let token = Token::parse(text.trim_end())?;
        let contents = cipher::open(&self.aead, &token)?;
        fs::write(&out, contents)?;
        debug!(src = %src.display(), dst = %out.display(), "file decrypted");
        Ok(out)
    }
}

impl FieldCipher for CipherService {
    fn seal(&self, plaintext: &[u8]) -> Result<Sealed, CipherError> {
        self.encrypt_bytes(plaintext)
    }

    fn open(&self, token: &Token) -> Result<Vec<u8>, CipherError> {
        self.decrypt_bytes(token)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Detected;
    use serde_json::json;
    use std::sync::Arc;

    fn service() -> CipherService {
        CipherService::new(EncryptionKey::generate(), true)
    }

    fn token_of(sealed: Sealed) -> Token {
        sealed.token().expect("service is enabled")
    }

    #[test]
    fn alice_scenario_under_two_keys() {
        let k1 = service();
        let k2 = service();
        let t1 = token_of(k1.encrypt_str("alice@example.com").unwrap());
        assert!(!t1.as_str().is_empty());
        assert!(t1.as_str().is_ascii());
        assert_ne!(t1.as_str(), "alice@example.com");

        assert_eq!(
            k1.decrypt(&t1).unwrap(),
            PlainValue::Text("alice@example.com".into())
        );
        assert!(matches!(k2.decrypt(&t1), Err(CipherError::InvalidToken)));
    }

    #[test]
    fn documents_come_back_as_documents() {
        let svc = service();
        let doc = json!({"loan": {"amount": 250000, "terms": [30, 15]}, "ssn": "123-45-6789"});
        let t = token_of(svc.encrypt_json(&doc).unwrap());
        assert_eq!(svc.decrypt(&t).unwrap(), PlainValue::Document(doc));

        let list = json!([1, "two", {"three": 3}]);
        let t = token_of(svc.encrypt(&PlainValue::from(list.clone())).unwrap());
        assert_eq!(svc.decrypt(&t).unwrap(), PlainValue::Document(list));
    }

    #[test]
    fn json_scalars_stay_text() {
        let svc = service();
        let t = token_of(svc.encrypt_str("42").unwrap());
        assert_eq!(svc.decrypt(&t).unwrap(), PlainValue::Text("42".into()));
    }

    #[test]
    fn non_utf8_comes_back_as_bytes() {
        let svc = service();
        let raw = vec![0xff, 0xfe, 0x00, 0x01];
        let t = token_of(svc.encrypt(&PlainValue::from(raw.clone())).unwrap());
        assert_eq!(svc.decrypt(&t).unwrap(), PlainValue::Bytes(raw));
    }

    #[test]
    fn disabled_service_returns_sentinel() {
        let svc = CipherService::new(EncryptionKey::generate(), false);
        assert!(!svc.is_enabled());
        assert_eq!(svc.encrypt_str("x").unwrap(), Sealed::Disabled);
        assert_eq!(svc.encrypt_json(&json!({"a": 1})).unwrap(), Sealed::Disabled);
    }

    #[test]
    fn decrypt_encoded_rejects_plaintext() {
        let svc = service();
        assert!(matches!(
            svc.decrypt_encoded("hello"),
            Err(CipherError::MalformedToken)
        ));
    }

    #[test]
    fn debug_shows_fingerprint_only() {
        let key = EncryptionKey::generate();
        let encoded = key.to_encoded();
        let svc = CipherService::new(key, true);
        let dbg = format!("{svc:?}");
        assert!(dbg.contains(&svc.key_fingerprint()));
        assert!(!dbg.contains(&encoded));
    }

    #[test]
    fn shared_across_threads() {
        let svc = Arc::new(service());
        std::thread::scope(|scope| {
            for i in 0..8 {
                let svc = Arc::clone(&svc);
                scope.spawn(move || {
                    let plain = format!("borrower-{i}");
                    let t = token_of(svc.encrypt_str(&plain).unwrap());
                    assert_eq!(svc.decrypt(&t).unwrap(), PlainValue::Text(plain));
                });
            }
        });
    }

    #[test]
    fn file_round_trip_with_default_names() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("statement.pdf");
        std::fs::write(&src, b"%PDF-1.7 binary \x00\xff payload").unwrap();

        let svc = service();
        let enc = svc.encrypt_file(&src, None).unwrap();
        assert_eq!(enc, dir.path().join("statement.pdf.enc"));
        let sealed = std::fs::read_to_string(&enc).unwrap();
        assert!(matches!(Token::detect(&sealed), Detected::Token(_)));

        std::fs::remove_file(&src).unwrap();
        let dec = svc.decrypt_file(&enc, None).unwrap();
        assert_eq!(dec, src);
        assert_eq!(
            std::fs::read(&dec).unwrap(),
            b"%PDF-1.7 binary \x00\xff payload"
        );
    }

    #[test]
    fn file_decrypt_without_enc_suffix_appends_dec() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("upload.bin");
        std::fs::write(&src, b"hello").unwrap();
        let svc = service();
        let sealed = dir.path().join("sealed.blob");
        svc.encrypt_file(&src, Some(&sealed)).unwrap();
        let out = svc.decrypt_file(&sealed, None).unwrap();
        assert_eq!(out, dir.path().join("sealed.blob.dec"));
        assert_eq!(std::fs::read(out).unwrap(), b"hello");
    }

    #[test]
    fn file_decrypt_under_wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, b"secret").unwrap();
        let enc = service().encrypt_file(&src, None).unwrap();
        assert!(matches!(
            service().decrypt_file(&enc, None),
            Err(CipherError::InvalidToken)
        ));
    }

    #[test]
    fn file_decrypt_of_plain_file_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("plain.txt.enc");
        std::fs::write(&src, b"just text").unwrap();
        assert!(matches!(
            service().decrypt_file(&src, None),
            Err(CipherError::MalformedToken)
        ));
    }
}
