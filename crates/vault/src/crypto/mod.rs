//! AES-256-GCM-SIV value encryption: the Cipher Service.
//!
//! This module is free of persistence concerns. It turns bytes, strings and
//! JSON documents into [`Token`]s and back, derives keys from passwords, and
//! seals whole files.
//!
//! # Token format
//!
//! ```text
//! base64url-no-pad( 0x81 ‖ timestamp ‖ nonce ‖ ciphertext ‖ tag )
//! ```
//!
//! The version byte enables future algorithm or key-format migration without
//! breaking existing ciphertext.

pub mod cipher;
pub mod kdf;
pub mod service;
pub mod token;

pub use cipher::CipherError;
pub use kdf::{derive_key, DerivedKey, PBKDF2_ITERATIONS};
pub use service::{CipherService, FieldCipher, PlainValue, Sealed};
pub use token::{Detected, Token, TOKEN_PREFIX};

#[cfg(test)]
pub use service::MockFieldCipher;
