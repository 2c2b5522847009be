//! # Domain Types
//!
//! Core domain types used throughout Dirsync.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌──────────────────────┐   ┌────────────────┐  │
//! │  │ DirectoryEntry   │   │   AccountRecord      │   │   LockState    │  │
//! │  │  ──────────────  │   │  ──────────────────  │   │  ────────────  │  │
//! │  │  directory_id    │   │  email (key)         │   │  Unlocked      │  │
//! │  │  email           │──►│  directory_id        │   │  DirectoryLock │  │
//! │  │  enabled         │   │  enabled             │   │  FullyLocked   │  │
//! │  │  (per sync run)  │   │  remote_account_id   │   └────────────────┘  │
//! │  └──────────────────┘   │  credential_secret   │                       │
//! │                         │  recovery_secret     │   ┌────────────────┐  │
//! │                         │  lock_state          │   │   LockType     │  │
//! │                         └──────────────────────┘   │  (remote API)  │  │
//! │                                                    └────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity
//! - `email`: the durable identity, unique per record
//! - `directory_id`: advisory, re-associated whenever the directory reports a
//!   different id for the same email (the directory recreated the identity)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// =============================================================================
// Directory Entry
// =============================================================================

/// One member of the synchronized directory group, as read during a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Directory-assigned identifier. Not stable across identity recreation.
    pub directory_id: String,

    /// Login name of the member, the stable identity key.
    pub email: String,

    /// Whether the directory considers the member active.
    pub enabled: bool,
}

impl DirectoryEntry {
    /// Creates a directory entry.
    pub fn new(directory_id: impl Into<String>, email: impl Into<String>, enabled: bool) -> Self {
        DirectoryEntry {
            directory_id: directory_id.into(),
            email: email.into(),
            enabled,
        }
    }
}

// =============================================================================
// Lock State
// =============================================================================

/// Lock state of a tracked account.
///
/// ## State Diagram
/// ```text
///                 provision collision
///   (no record) ─────────────────────► DIRECTORY_LOCKED
///        │                                  │
///        │ provision ok                     │ retry ok / bind-link ok
///        ▼                                  │
///    UNLOCKED ◄─────────────────────────────┘
///      │   ▲
///      │   │ directory enabled
///      ▼   │
///   FULLY_LOCKED
///      (directory disabled or member removed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum LockState {
    /// Account is managed by the engine and usable.
    Unlocked,
    /// Name is claimed remotely by an account the engine does not own yet.
    DirectoryLocked,
    /// Account is disabled because the directory disabled or removed the member.
    FullyLocked,
}

impl LockState {
    /// Returns the storage name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockState::Unlocked => "unlocked",
            LockState::DirectoryLocked => "directory_locked",
            LockState::FullyLocked => "fully_locked",
        }
    }
}

impl std::fmt::Display for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LockState {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unlocked" => Ok(LockState::Unlocked),
            "directory_locked" => Ok(LockState::DirectoryLocked),
            "fully_locked" => Ok(LockState::FullyLocked),
            other => Err(CoreError::UnknownLockState(other.to_string())),
        }
    }
}

// =============================================================================
// Lock Type
// =============================================================================

/// Lock operation requested from the remote account service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// Lift any lock on the account.
    Unlock,
    /// Reserve the name for a directory member that has not linked yet.
    DirectoryLock,
    /// Disable the account.
    FullLock,
}

impl LockType {
    /// The lock state a record reaches once this lock type is applied remotely.
    pub fn resulting_state(&self) -> LockState {
        match self {
            LockType::Unlock => LockState::Unlocked,
            LockType::DirectoryLock => LockState::DirectoryLocked,
            LockType::FullLock => LockState::FullyLocked,
        }
    }
}

impl std::fmt::Display for LockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockType::Unlock => write!(f, "unlock"),
            LockType::DirectoryLock => write!(f, "directory_lock"),
            LockType::FullLock => write!(f, "full_lock"),
        }
    }
}

// =============================================================================
// Account Record
// =============================================================================

/// A tracked identity and its link/lock state.
///
/// ## Invariants
/// - UNLOCKED and FULLY_LOCKED records carry a `remote_account_id`
/// - DIRECTORY_LOCKED records carry no `credential_secret`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct AccountRecord {
    pub email: String,
    pub directory_id: String,
    /// Last directory enablement seen by a sync run.
    pub enabled: bool,
    pub remote_account_id: Option<String>,
    #[serde(skip_serializing)]
    pub credential_secret: Option<String>,
    #[serde(skip_serializing)]
    pub recovery_secret: Option<String>,
    pub lock_state: LockState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccountRecord {
    /// Returns true if the record is linked to a usable remote account.
    pub fn is_linked(&self) -> bool {
        self.lock_state == LockState::Unlocked && self.remote_account_id.is_some()
    }

    /// Returns true if the engine may run membership steps for this record.
    pub fn is_active(&self) -> bool {
        self.enabled && self.is_linked()
    }
}

// =============================================================================
// Provisioned Credentials
// =============================================================================

/// Credentials handed out by the remote service when an account is created
/// or linked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountCredentials {
    pub remote_account_id: String,
    pub credential_secret: String,
    pub recovery_secret: String,
}
