//! Password-based key derivation (PBKDF2-HMAC-SHA256).

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};
use hmac::Hmac;
use sha2::Sha256;

use super::cipher::CipherError;
use crate::keys::{EncryptionKey, KEY_LEN};

/// Hash-stretching rounds applied to every password.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// Byte length of a generated salt.
pub const SALT_LEN: usize = 16;

/// A password-derived key together with the salt that produced it.
///
/// The salt is not secret but must be persisted by the caller; without it the
/// same password cannot reproduce the key.
#[derive(Debug, Clone)]
pub struct DerivedKey {
    pub key: EncryptionKey,
    pub salt: Vec<u8>,
}

/// Derive a key from `password`, drawing a random salt when none is given.
///
/// # Errors
///
/// Returns [`CipherError::InvalidKeyLength`] if the PRF rejects the output
/// length (unreachable for [`KEY_LEN`]).
pub fn derive_key(password: &str, salt: Option<&[u8]>) -> Result<DerivedKey, CipherError> {
    let salt = match salt {
        Some(s) => s.to_vec(),
        None => {
            let mut s = vec![0u8; SALT_LEN];
            OsRng.fill_bytes(&mut s);
            s
        }
    };

    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), &salt, PBKDF2_ITERATIONS, &mut out)
        .map_err(|_| CipherError::InvalidKeyLength)?;
    let key = EncryptionKey::from_array(out);
    out.iter_mut().for_each(|b| *b = 0);

    Ok(DerivedKey { key, salt })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_reproduce_key() {
        let first = derive_key("correct horse battery staple", None).unwrap();
        assert_eq!(first.salt.len(), SALT_LEN);
        let again = derive_key("correct horse battery staple", Some(&first.salt)).unwrap();
        assert_eq!(first.key.as_bytes(), again.key.as_bytes());
        assert_eq!(first.salt, again.salt);
    }

    #[test]
    fn different_salt_changes_key() {
        let a = derive_key("pw", Some(b"salt-one-16bytes")).unwrap();
        let b = derive_key("pw", Some(b"salt-two-16bytes")).unwrap();
        assert_ne!(a.key.as_bytes(), b.key.as_bytes());
    }
}
