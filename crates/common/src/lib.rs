//! Common types, wire shapes, and errors shared across the vault crates.

pub mod error;
pub mod protocol;

pub use error::VaultError;
pub use protocol::{Envelope, JobState, RotationReport, TableReport};
