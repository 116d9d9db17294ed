//! `vault`: field-level encryption at rest for the loan-document backend.
//!
//! Wiring at service startup:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging ([`telemetry::init`]).
//! 3. Build one [`CipherService`] from the configured key and share it as an
//!    `Arc` through a [`CryptoContext`].
//! 4. Load the table classification into a [`SchemaRegistry`] and build one
//!    column adapter per encrypted field.
//!
//! The persistence layer then routes every bound value through
//! [`EncryptedColumn::encode`] and every fetched value through
//! [`EncryptedColumn::decode`]. Bulk re-encryption lives in [`rotation`].

pub mod column;
pub mod config;
pub mod crypto;
pub mod keys;
pub mod rotation;
pub mod schema;
pub mod store;
pub mod telemetry;

pub use column::{
    ColumnAdapter, ColumnKind, CryptoContext, EncryptedBlob, EncryptedColumn, EncryptedDocument,
    EncryptedScalar, EncryptionMode, StoredValue,
};
pub use config::Config;
pub use crypto::{CipherError, CipherService, Token};
pub use keys::EncryptionKey;
pub use schema::SchemaRegistry;
