//! # Sync Error Types
//!
//! Error types for the sync engine.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Directory     │  │   Remote service        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Directory      │  │  Remote(RemoteError)    │ │
//! │  │  UnknownKey     │  │   Unavailable   │  │  SessionNotReady        │ │
//! │  │                 │  │                 │  │  InvalidEvent           │ │
//! │  │  InvalidUrl     │  │  DirectoryQuery │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │    Pipeline     │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Database       │  │  StaleRecord    │  │  Internal               │ │
//! │  │                 │  │  Domain         │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! None of these ever terminate the host: the driver, the event loop and the
//! bind workers log them and carry on.

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all engine failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid engine configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A config key that the store does not know.
    #[error("'{0}' is not a valid config variable")]
    UnknownConfigKey(String),

    /// Invalid directory URL.
    #[error("Invalid directory URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Directory Errors
    // =========================================================================
    /// Could not reach or bind to the directory.
    #[error("Directory unavailable: {0}")]
    DirectoryUnavailable(String),

    /// A directory search or read failed.
    #[error("Directory query failed: {0}")]
    DirectoryQuery(String),

    // =========================================================================
    // Remote Service Errors
    // =========================================================================
    /// The remote account service returned an error.
    #[error("Remote service error: {0}")]
    Remote(#[from] RemoteError),

    /// The engine's remote identity is not yet usable.
    #[error("Remote session not ready: {0}")]
    SessionNotReady(String),

    /// An event payload that could not be decoded.
    #[error("Invalid {kind} event: {reason}")]
    InvalidEvent { kind: String, reason: String },

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Account store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    /// A guarded update found the record in another state than expected.
    #[error("Account {email} changed concurrently, expected {expected}")]
    StaleRecord { email: String, expected: String },

    /// A lock state machine rule was violated.
    #[error("{0}")]
    Domain(#[from] dirsync_core::CoreError),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<dirsync_db::DbError> for SyncError {
    fn from(err: dirsync_db::DbError) -> Self {
        SyncError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::InvalidEvent {
            kind: "unknown".into(),
            reason: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

impl From<ldap3::LdapError> for SyncError {
    fn from(err: ldap3::LdapError) -> Self {
        SyncError::DirectoryQuery(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the next cycle or event may succeed without operator
    /// action.
    ///
    /// ## Retryable Errors
    /// - Directory connection failures
    /// - Transient remote failures (network, timeout)
    /// - Concurrent record changes
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::DirectoryUnavailable(_)
            | SyncError::DirectoryQuery(_)
            | SyncError::SessionNotReady(_)
            | SyncError::StaleRecord { .. } => true,
            SyncError::Remote(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::UnknownConfigKey(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::DirectoryUnavailable("refused".into()).is_retryable());
        assert!(SyncError::Remote(RemoteError::Transport("timeout".into())).is_retryable());

        assert!(!SyncError::Remote(RemoteError::Collision("a@x.com".into())).is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
    }

    #[test]
    fn test_config_errors() {
        assert!(SyncError::UnknownConfigKey("nope".into()).is_config_error());
        assert!(!SyncError::Internal("boom".into()).is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::UnknownConfigKey("sync.colour".into());
        assert_eq!(err.to_string(), "'sync.colour' is not a valid config variable");

        let err = SyncError::StaleRecord {
            email: "bob@x.com".into(),
            expected: "unlocked".into(),
        };
        assert!(err.to_string().contains("bob@x.com"));
    }
}
