//! Active-key resolution.
//!
//! # Lifecycle
//!
//! 1. At startup, [`resolve_key`] reads the base64url key from configuration.
//! 2. A missing key is replaced by a freshly generated one. It lives only in
//!    process memory and is lost on restart, so a loud warning is emitted.
//! 3. A key that does not decode to exactly [`KEY_LEN`] bytes is rejected and
//!    replaced the same way. It is never truncated or padded.
//!
//! # Security invariants
//!
//! - Key bytes are never logged; only [`EncryptionKey::fingerprint`] is.
//! - Key buffers are zeroed on drop.

pub mod material;

pub use material::{EncryptionKey, KeyError, KEY_LEN};

use tracing::{info, warn};

/// Where the active key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Decoded from configuration.
    Configured,
    /// No key was configured; an ephemeral key was generated.
    GeneratedMissing,
    /// The configured key was unusable; an ephemeral key was generated.
    GeneratedInvalid,
}

impl KeySource {
    /// `true` when the key will not survive a restart.
    pub fn is_ephemeral(self) -> bool {
        !matches!(self, KeySource::Configured)
    }
}

/// Resolve the active key from its configured textual form.
pub fn resolve_key(configured: Option<&str>) -> (EncryptionKey, KeySource) {
    let Some(text) = configured.filter(|t| !t.trim().is_empty()) else {
        let key = EncryptionKey::generate();
        warn!(
            fingerprint = %key.fingerprint(),
            "no ENCRYPTION_KEY configured; generated an ephemeral key that is NOT persisted \
             and will be lost on restart. Data encrypted under it becomes unreadable."
        );
        return (key, KeySource::GeneratedMissing);
    };

    match EncryptionKey::from_encoded(text) {
        Ok(key) => {
            info!(fingerprint = %key.fingerprint(), "encryption key loaded from configuration");
            (key, KeySource::Configured)
        }
        Err(e) => {
            let key = EncryptionKey::generate();
            warn!(
                error = %e,
                fingerprint = %key.fingerprint(),
                "configured ENCRYPTION_KEY rejected; generated an ephemeral key that is NOT \
                 persisted and will be lost on restart"
            );
            (key, KeySource::GeneratedInvalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE, Engine as _};

    #[test]
    fn configured_key_is_used() {
        let key = EncryptionKey::generate();
        let (resolved, source) = resolve_key(Some(&key.to_encoded()));
        assert_eq!(source, KeySource::Configured);
        assert!(!source.is_ephemeral());
        assert_eq!(resolved.as_bytes(), key.as_bytes());
    }

    #[test]
    fn missing_key_generates_ephemeral() {
        let (_, source) = resolve_key(None);
        assert_eq!(source, KeySource::GeneratedMissing);
        assert!(source.is_ephemeral());

        let (_, source) = resolve_key(Some("   "));
        assert_eq!(source, KeySource::GeneratedMissing);
    }

    #[test]
    fn wrong_length_key_is_replaced_not_truncated() {
        let short = URL_SAFE.encode([9u8; 16]);
        let (resolved, source) = resolve_key(Some(&short));
        assert_eq!(source, KeySource::GeneratedInvalid);
        assert_eq!(resolved.as_bytes().len(), KEY_LEN);
        assert_ne!(&resolved.as_bytes()[..16], &[9u8; 16][..]);

        let long = URL_SAFE.encode([9u8; 40]);
        let (resolved, source) = resolve_key(Some(&long));
        assert_eq!(source, KeySource::GeneratedInvalid);
        assert_ne!(&resolved.as_bytes()[..], &[9u8; 32][..]);
    }

    #[test]
    fn garbage_key_is_replaced() {
        let (_, source) = resolve_key(Some("%%%"));
        assert_eq!(source, KeySource::GeneratedInvalid);
    }
}
