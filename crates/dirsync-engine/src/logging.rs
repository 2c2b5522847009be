//! Tracing subscriber setup for hosts embedding the engine.
//!
//! ## Log Levels
//! - `RUST_LOG=debug` - Show debug messages
//! - `RUST_LOG=dirsync_engine=trace` - Trace the engine only
//! - Default: INFO level, sqlx and ldap3 at WARN

use tracing_subscriber::EnvFilter;

use crate::error::{SyncError, SyncResult};

fn default_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug,sqlx=warn,ldap3=info")
    } else {
        EnvFilter::new("info,sqlx=warn,ldap3=warn")
    }
}

/// Installs a global fmt subscriber. `RUST_LOG` wins over `debug`.
///
/// Fails instead of panicking when a subscriber is already installed.
pub fn init_logging(debug: bool) -> SyncResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| SyncError::Internal(format!("Failed to install logger: {}", e)))
}
