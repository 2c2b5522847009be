//! # Validation Module
//!
//! Input checks applied to directory data before it reaches the store.
//!
//! ## Where Validation Happens
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Directory adapter                                            │
//! │  └── Skips entries without a username or id                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Sync driver (THIS MODULE)                                    │
//! │  ├── Email shape                                                       │
//! │  └── Exclusion list                                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── PRIMARY KEY on email                                              │
//! │  └── CHECK on lock_state                                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use dirsync_core::validation::{validate_email, ExclusionList};
//!
//! validate_email("alice@x.com").unwrap();
//!
//! let excluded = ExclusionList::parse("svc-backup@x.com, admin@x.com");
//! assert!(excluded.contains("Admin@X.com"));
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest address accepted (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

// =============================================================================
// Email
// =============================================================================

/// Validates a directory username used as the account email.
///
/// ## Rules
/// - Must not be empty
/// - At most 254 characters
/// - Exactly one `@` with a non-empty local part and domain
/// - No whitespace
pub fn validate_email(email: &str) -> ValidationResult<()> {
    if email.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "email".to_string(),
        });
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong {
            field: "email".to_string(),
            max: MAX_EMAIL_LENGTH,
        });
    }

    if email.chars().any(char::is_whitespace) {
        return Err(invalid_email("contains whitespace"));
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(invalid_email("expected local@domain")),
    }
}

fn invalid_email(reason: &str) -> ValidationError {
    ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// Exclusion List
// =============================================================================

/// Accounts that the sync must never manage (service users, admins).
///
/// Matching ignores ASCII case and surrounding spaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionList {
    entries: Vec<String>,
}

impl ExclusionList {
    /// Builds a list from individual addresses. Blank items are ignored.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = items
            .into_iter()
            .map(|s| s.as_ref().trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        ExclusionList { entries }
    }

    /// Parses a comma-separated list such as `"a@x.com, b@x.com"`.
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Returns true if `email` is excluded.
    pub fn contains(&self, email: &str) -> bool {
        let email = email.trim();
        self.entries.iter().any(|e| e.eq_ignore_ascii_case(email))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
