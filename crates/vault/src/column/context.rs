//! [`CryptoContext`]: the cipher plus the enable/strict policy every adapter
//! applies at bind time.

use std::sync::Arc;

use common::VaultError;
use tracing::warn;

use crate::crypto::{CipherError, FieldCipher, Sealed, Token};

/// Whether adapters encrypt, and what happens when they cannot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptionMode {
    /// Adapters encrypt on write. When `false` they pass values through.
    pub enabled: bool,
    /// A failed encryption fails the write instead of storing plaintext.
    pub strict: bool,
}

impl EncryptionMode {
    /// Pass-through: nothing is encrypted.
    pub const DISABLED: Self = Self {
        enabled: false,
        strict: false,
    };

    /// Encryption is mandatory.
    pub const STRICT: Self = Self {
        enabled: true,
        strict: true,
    };

    /// Encryption is attempted; failures degrade to plaintext with a warning.
    pub const LENIENT: Self = Self {
        enabled: true,
        strict: false,
    };
}

/// What an adapter should bind after asking the cipher to seal a value.
#[derive(Debug)]
pub(crate) enum Binding {
    Sealed(Token),
    /// Lenient degradation: store the plaintext.
    Plaintext,
}

/// The shared cipher handle and policy.
///
/// Cheap to clone; hand one to every adapter built at startup.
#[derive(Clone)]
pub struct CryptoContext {
    cipher: Arc<dyn FieldCipher>,
    mode: EncryptionMode,
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl CryptoContext {
    /// Bind `cipher` under `mode`.
    pub fn new(cipher: Arc<dyn FieldCipher>, mode: EncryptionMode) -> Self {
        Self { cipher, mode }
    }

    /// The active policy.
    pub fn mode(&self) -> EncryptionMode {
        self.mode
    }

    /// Whether adapters encrypt on write.
    pub fn is_enabled(&self) -> bool {
        self.mode.enabled
    }

    /// Ask the cipher to seal `plaintext` and apply the strict/lenient policy.
    ///
    /// # Errors
    ///
    /// In strict mode, returns [`VaultError::Encryption`] when the cipher
    /// reports itself disabled or fails.
    pub(crate) fn bind(&self, plaintext: &[u8]) -> Result<Binding, VaultError> {
        let failure = match self.cipher.seal(plaintext) {
            Ok(Sealed::Token(token)) => return Ok(Binding::Sealed(token)),
            Ok(Sealed::Disabled) => "cipher service is disabled".to_owned(),
            Err(e) => e.to_string(),
        };

        if self.mode.strict {
            return Err(VaultError::Encryption(failure));
        }
        warn!(
            reason = %failure,
            "encryption unavailable; storing value as plaintext (lenient mode)"
        );
        Ok(Binding::Plaintext)
    }

    /// Open a token through the cipher.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::InvalidToken`] when authentication fails and
    /// [`VaultError::Decode`] for any other cipher failure.
    pub(crate) fn open(&self, token: &Token) -> Result<Vec<u8>, VaultError> {
        self.cipher.open(token).map_err(|e| match e {
            CipherError::InvalidToken => VaultError::InvalidToken,
            other => VaultError::Decode(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MockFieldCipher;

    #[test]
    fn strict_mode_rejects_disabled_cipher() {
        let mut mock = MockFieldCipher::new();
        mock.expect_seal().returning(|_| Ok(Sealed::Disabled));
        let ctx = CryptoContext::new(Arc::new(mock), EncryptionMode::STRICT);
        assert!(matches!(ctx.bind(b"x"), Err(VaultError::Encryption(_))));
    }

    #[test]
    fn strict_mode_propagates_cipher_failure() {
        let mut mock = MockFieldCipher::new();
        mock.expect_seal().returning(|_| Err(CipherError::Encryption));
        let ctx = CryptoContext::new(Arc::new(mock), EncryptionMode::STRICT);
        let err = ctx.bind(b"x").unwrap_err();
        assert_eq!(err.code(), "encryption_failed");
    }

    #[test]
    fn lenient_mode_degrades_to_plaintext() {
        let mut mock = MockFieldCipher::new();
        mock.expect_seal().times(2).returning({
            let mut calls = 0;
            move |_| {
                calls += 1;
                if calls == 1 {
                    Ok(Sealed::Disabled)
                } else {
                    Err(CipherError::Encryption)
                }
            }
        });
        let ctx = CryptoContext::new(Arc::new(mock), EncryptionMode::LENIENT);
        assert!(matches!(ctx.bind(b"x"), Ok(Binding::Plaintext)));
        assert!(matches!(ctx.bind(b"y"), Ok(Binding::Plaintext)));
    }

    #[test]
    fn open_maps_authentication_failure() {
        let mut mock = MockFieldCipher::new();
        mock.expect_open().returning(|_| Err(CipherError::InvalidToken));
        let ctx = CryptoContext::new(Arc::new(mock), EncryptionMode::STRICT);
        let token = crate::crypto::Token::assemble(1, &[0u8; 12], vec![0u8; 16]);
        assert!(matches!(ctx.open(&token), Err(VaultError::InvalidToken)));
    }
}
