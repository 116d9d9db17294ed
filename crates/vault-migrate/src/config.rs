//! Settings for a run: environment configuration merged with command-line
//! overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use vault::{Config, EncryptionKey};

use crate::cli::JobArgs;

/// Validated settings for `encrypt-existing` and `rotate-key`.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub database: PathBuf,
    pub schema: PathBuf,
    pub batch_size: usize,
    pub dry_run: bool,
    pub checkpoint: Option<PathBuf>,
    /// Held exclusively for the whole run so only one job writes at a time.
    pub lock_path: PathBuf,
}

impl JobSettings {
    /// Merge `args` over `cfg`.
    pub fn resolve(args: &JobArgs, cfg: &Config) -> Result<Self> {
        let s = Self {
            database: args.database.clone(),
            schema: args.schema.clone(),
            batch_size: args.batch_size.unwrap_or(cfg.rotation_batch_size),
            dry_run: args.dry_run,
            checkpoint: args.checkpoint.clone(),
            lock_path: lock_path_for(&args.database),
        };
        s.validate()?;
        Ok(s)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("--batch-size must be > 0");
        }
        if self.checkpoint.as_deref() == Some(self.database.as_path()) {
            anyhow::bail!("--checkpoint must not point at the database file");
        }
        Ok(())
    }
}

/// `<database>.rotation.lock`, next to the database.
pub fn lock_path_for(database: &Path) -> PathBuf {
    let mut name = database.as_os_str().to_owned();
    name.push(".rotation.lock");
    PathBuf::from(name)
}

/// The key named by `ENCRYPTION_KEY`.
///
/// Unlike the services, the CLI never falls back to an ephemeral key: data
/// rewritten under a key nobody kept would be lost.
pub fn configured_key(cfg: &Config) -> Result<EncryptionKey> {
    let encoded = cfg
        .encryption_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .context("ENCRYPTION_KEY must be set to the currently active key")?;
    decode_key("ENCRYPTION_KEY", encoded)
}

/// Decode a base64url key, naming `source` in the error.
pub fn decode_key(source: &str, encoded: &str) -> Result<EncryptionKey> {
    EncryptionKey::from_encoded(encoded.trim()).with_context(|| format!("{source} is not a valid key"))
}
