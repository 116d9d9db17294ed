//! Configuration loading and validation for the encryption layer.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any variable is present but invalid.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::column::EncryptionMode;

/// Validated encryption-layer configuration.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Whether column adapters encrypt on write.
    #[serde(default)]
    pub encryption_enabled: bool,

    /// Base64url-encoded 32-byte active key. When absent an ephemeral key is
    /// generated at startup.
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// When `true`, a failed encryption fails the write instead of degrading
    /// to plaintext storage.
    #[serde(default)]
    pub encryption_strict: bool,

    /// Records loaded, re-encrypted and committed together by rotation jobs.
    #[serde(default = "default_rotation_batch_size")]
    pub rotation_batch_size: usize,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_rotation_batch_size() -> usize {
    500
}
fn default_log_level() -> String {
    "info".into()
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("encryption_enabled", &self.encryption_enabled)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("encryption_strict", &self.encryption_strict)
            .field("rotation_batch_size", &self.rotation_batch_size)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_enabled: false,
            encryption_key: None,
            encryption_strict: false,
            rotation_batch_size: default_rotation_batch_size(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;
        Self::from_settings(settings)
    }

    fn from_settings(settings: config::Config) -> Result<Self> {
        let c: Config = settings
            .try_deserialize()
            .context("failed to deserialise configuration")?;
        c.validate()?;
        Ok(c)
    }

    /// The adapter-facing view of the enable and strict flags.
    pub fn mode(&self) -> EncryptionMode {
        EncryptionMode {
            enabled: self.encryption_enabled,
            strict: self.encryption_strict,
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.rotation_batch_size == 0 {
            anyhow::bail!("ROTATION_BATCH_SIZE must be > 0");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("LOG_LEVEL must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_rotation_batch_size(), 500);
        assert_eq!(default_log_level(), "info");
        let cfg = Config::default();
        assert!(!cfg.encryption_enabled);
        assert!(!cfg.encryption_strict);
        assert!(cfg.encryption_key.is_none());
    }

    #[test]
    fn settings_deserialise_from_strings() {
        let settings = config::Config::builder()
            .set_override("encryption_enabled", "true")
            .unwrap()
            .set_override("encryption_strict", "true")
            .unwrap()
            .set_override("rotation_batch_size", "25")
            .unwrap()
            .build()
            .unwrap();
        let cfg = Config::from_settings(settings).unwrap();
        assert!(cfg.encryption_enabled);
        assert_eq!(cfg.rotation_batch_size, 25);
        assert_eq!(
            cfg.mode(),
            EncryptionMode {
                enabled: true,
                strict: true
            }
        );
    }

    #[test]
    fn validate_rejects_zero_batch_size() {
        let cfg = Config {
            rotation_batch_size: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_redacts_key() {
        let cfg = Config {
            encryption_key: Some("c2VjcmV0LWtleS1tYXRlcmlhbA==".into()),
            ..Config::default()
        };
        let dbg = format!("{cfg:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("c2VjcmV0"));
    }
}
