//! `vault-migrate`: operator CLI for the encryption layer.
//!
//! Startup sequence:
//! 1. Parse the command line.
//! 2. Load and validate [`vault::Config`] from environment variables.
//! 3. Initialise structured JSON logging on stderr.
//! 4. Run the command; reports and keys go to stdout.

mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use vault::rotation::JobKind;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------------
    let cfg = vault::Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------------
    vault::telemetry::init(&cfg.log_level)?;

    // -----------------------------------------------------------------------
    // Command
    // -----------------------------------------------------------------------
    match cli.command {
        Command::EncryptExisting { job } => {
            commands::run_job(JobKind::EncryptExisting, &job, None, &cfg).await
        }
        Command::RotateKey { job, new_key } => {
            commands::run_job(JobKind::RotateKey, &job, Some(&new_key), &cfg).await
        }
        Command::GenerateKey => commands::generate_key(&mut std::io::stdout()),
        Command::DeriveKey { password, salt } => {
            commands::derive_key(&password, salt.as_deref(), &mut std::io::stdout())
        }
        Command::EncryptFile { input, output } => {
            commands::encrypt_file(&cfg, &input, output.as_deref())
        }
        Command::DecryptFile { input, output } => {
            commands::decrypt_file(&cfg, &input, output.as_deref())
        }
    }
}
