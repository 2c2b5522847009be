//! # Error Types
//!
//! Domain-specific error types for dirsync-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  dirsync-core errors (this file)                                       │
//! │  ├── CoreError        - Lock transition / record rule violations       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  dirsync-db errors (separate crate)                                    │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  dirsync-engine errors                                                 │
//! │  └── SyncError        - What the driver and handlers log               │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → log line    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::LockState;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lock transition that the state machine does not allow.
    ///
    /// ## When This Occurs
    /// - Linking a record that is not DIRECTORY_LOCKED
    /// - Approving a device for a record that is not UNLOCKED
    #[error("Account {email} is {current}, cannot move to {target}")]
    InvalidTransition {
        email: String,
        current: LockState,
        target: LockState,
    },

    /// A stored lock state string that is not one of the three known states.
    #[error("Unknown lock state: '{0}'")]
    UnknownLockState(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., an email without a domain).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_message() {
        let err = CoreError::InvalidTransition {
            email: "alice@x.com".to_string(),
            current: LockState::Unlocked,
            target: LockState::DirectoryLocked,
        };
        assert_eq!(
            err.to_string(),
            "Account alice@x.com is unlocked, cannot move to directory_locked"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let err: CoreError = ValidationError::Required {
            field: "email".to_string(),
        }
        .into();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(err.to_string(), "Validation error: email is required");
    }
}
