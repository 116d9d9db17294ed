//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "vault-migrate")]
#[command(version)]
#[command(about = "Bulk encryption, key rotation and key utilities for encrypted columns")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt legacy plaintext in place under ENCRYPTION_KEY
    EncryptExisting {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Re-encrypt every encrypted field from ENCRYPTION_KEY to a new key
    RotateKey {
        #[command(flatten)]
        job: JobArgs,
        /// The new key (base64url, 32 bytes)
        #[arg(long, env = "NEW_ENCRYPTION_KEY", hide_env_values = true)]
        new_key: String,
    },
    /// Print a fresh random key
    GenerateKey,
    /// Derive a key from a password with PBKDF2
    DeriveKey {
        #[arg(long, env = "DERIVE_KEY_PASSWORD", hide_env_values = true)]
        password: String,
        /// Base64 salt; a random one is generated and printed when omitted
        #[arg(long)]
        salt: Option<String>,
    },
    /// Seal a whole file under ENCRYPTION_KEY
    EncryptFile {
        input: PathBuf,
        /// Defaults to the input path with `.enc` appended
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Open a file sealed by `encrypt-file`
    DecryptFile {
        input: PathBuf,
        /// Defaults to the input path with `.enc` stripped
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Options shared by the two table-rewriting commands.
#[derive(Debug, Clone, Args)]
pub struct JobArgs {
    /// SQLite database file
    #[arg(long)]
    pub database: PathBuf,
    /// Schema file (YAML or JSON) classifying every column
    #[arg(long)]
    pub schema: PathBuf,
    /// Run the full re-encryption logic without writing
    #[arg(long)]
    pub dry_run: bool,
    /// Records per batch; overrides ROTATION_BATCH_SIZE
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Checkpoint file; an existing one is resumed
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,
    /// Confirmation phrase, for non-interactive runs
    #[arg(long)]
    pub confirm: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_rotate_key() {
        let cli = Cli::try_parse_from([
            "vault-migrate",
            "rotate-key",
            "--database",
            "loans.db",
            "--schema",
            "schema.yaml",
            "--new-key",
            "abc",
            "--batch-size",
            "100",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Command::RotateKey { job, new_key } => {
                assert_eq!(new_key, "abc");
                assert_eq!(job.batch_size, Some(100));
                assert!(job.dry_run);
                assert!(job.checkpoint.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn encrypt_existing_requires_database_and_schema() {
        assert!(Cli::try_parse_from(["vault-migrate", "encrypt-existing"]).is_err());
    }
}
