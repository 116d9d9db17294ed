//! Structured logging for the encryption layer and its operator tooling.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, tokens or key material** in any log field. Keys appear
//!   only as fingerprints; records only by primary key.
//! - Log level comes from `LOG_LEVEL` (default `info`); `RUST_LOG` overrides it.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: JSON lines on stderr, filtered by
/// `RUST_LOG` or else `log_level`.
///
/// Stdout is left to command output (reports, generated keys).
///
/// # Errors
///
/// Returns an error if `log_level` is not a valid filter or a subscriber has
/// already been set.
pub fn init(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level: {log_level}"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .context("failed to initialise tracing subscriber")
}

