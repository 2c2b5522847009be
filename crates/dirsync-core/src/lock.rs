//! # Lock State Machine
//!
//! Pure rules mapping directory enablement and the current record state to
//! the next lock state and the remote call required to get there.
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  current            directory     remote call       next state          │
//! │  ─────────────────  ───────────   ───────────────   ─────────────────── │
//! │  UNLOCKED           disabled      FullLock          FULLY_LOCKED        │
//! │  FULLY_LOCKED       enabled       Unlock            UNLOCKED            │
//! │  UNLOCKED           enabled       Unlock            UNLOCKED            │
//! │  FULLY_LOCKED       disabled      FullLock          FULLY_LOCKED        │
//! │  DIRECTORY_LOCKED   any           (none)            DIRECTORY_LOCKED    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Leaving DIRECTORY_LOCKED is only possible through a successful retry of
//! provisioning or a bind/link, see [`require_state`].

use crate::error::{CoreError, CoreResult};
use crate::types::{AccountRecord, LockState, LockType};

/// Outcome of planning a lock update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPlan {
    /// Remote lock call to issue, if any.
    pub remote_call: Option<LockType>,
    /// State to persist once the remote call (if any) succeeded.
    pub next_state: LockState,
}

/// Plans the lock update for a record given the directory's enablement.
///
/// DIRECTORY_LOCKED records are under external claim: no remote call is
/// planned and the state is kept, only the cached `enabled` flag changes.
pub fn plan_lock_update(current: LockState, directory_enabled: bool) -> LockPlan {
    if current == LockState::DirectoryLocked {
        return LockPlan {
            remote_call: None,
            next_state: LockState::DirectoryLocked,
        };
    }

    let lock_type = target_lock_type(directory_enabled);
    LockPlan {
        remote_call: Some(lock_type),
        next_state: lock_type.resulting_state(),
    }
}

/// Lock type matching a directory enablement flag.
pub fn target_lock_type(directory_enabled: bool) -> LockType {
    if directory_enabled {
        LockType::Unlock
    } else {
        LockType::FullLock
    }
}

/// Checks that `record` is in `expected` before moving it to `target`.
///
/// ## Errors
/// `CoreError::InvalidTransition` when the record is in any other state.
pub fn require_state(
    record: &AccountRecord,
    expected: LockState,
    target: LockState,
) -> CoreResult<()> {
    if record.lock_state == expected {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            email: record.email.clone(),
            current: record.lock_state,
            target,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const ALL_STATES: [LockState; 3] = [
        LockState::Unlocked,
        LockState::DirectoryLocked,
        LockState::FullyLocked,
    ];

    #[test]
    fn test_disable_locks_fully() {
        let plan = plan_lock_update(LockState::Unlocked, false);
        assert_eq!(plan.remote_call, Some(LockType::FullLock));
        assert_eq!(plan.next_state, LockState::FullyLocked);
    }

    #[test]
    fn test_enable_unlocks() {
        let plan = plan_lock_update(LockState::FullyLocked, true);
        assert_eq!(plan.remote_call, Some(LockType::Unlock));
        assert_eq!(plan.next_state, LockState::Unlocked);
    }

    #[test]
    fn test_directory_locked_is_never_touched() {
        for enabled in [true, false] {
            let plan = plan_lock_update(LockState::DirectoryLocked, enabled);
            assert_eq!(plan.remote_call, None);
            assert_eq!(plan.next_state, LockState::DirectoryLocked);
        }
    }

    #[test]
    fn test_lock_update_never_enters_directory_locked() {
        for state in ALL_STATES {
            for enabled in [true, false] {
                let plan = plan_lock_update(state, enabled);
                if state != LockState::DirectoryLocked {
                    assert_ne!(plan.next_state, LockState::DirectoryLocked);
                    assert_ne!(plan.remote_call, Some(LockType::DirectoryLock));
                }
            }
        }
    }

    #[test]
    fn test_require_state() {
        let record = AccountRecord {
            email: "bob@x.com".to_string(),
            directory_id: "4".to_string(),
            enabled: true,
            remote_account_id: Some("acct-4".to_string()),
            credential_secret: Some("pw".to_string()),
            recovery_secret: Some("l2".to_string()),
            lock_state: LockState::Unlocked,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(require_state(&record, LockState::Unlocked, LockState::Unlocked).is_ok());

        let err = require_state(&record, LockState::DirectoryLocked, LockState::Unlocked)
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::InvalidTransition {
                current: LockState::Unlocked,
                ..
            }
        ));
    }
}
