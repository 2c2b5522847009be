//! # Delta Work Lists
//!
//! The result of comparing one directory snapshot with the tracked records.
//!
//! ```text
//!   directory snapshot ──┐
//!                        ├──► re-associate ids ──► categorize ──► Delta
//!   account records ─────┘        (applied)                      ├─ setup
//!                                                                 ├─ retry_setup
//!                                                                 └─ update_lock
//! ```
//!
//! The lists are disjoint by email within one delta.

use std::collections::HashSet;

use serde::Serialize;

use crate::types::{DirectoryEntry, LockState};

/// A record whose cached enablement has to follow the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockUpdate {
    pub email: String,
    pub directory_id: String,
    /// Enablement the record must end up with.
    pub enabled: bool,
    /// Lock state of the record when the delta was computed.
    pub lock_state: LockState,
    /// True when the member is no longer in the directory group at all.
    pub vanished: bool,
}

/// Categorized work for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    /// Enabled entries with no record, by id or by email.
    pub setup: Vec<DirectoryEntry>,
    /// Enabled entries whose record is DIRECTORY_LOCKED. The email is the
    /// record's email.
    pub retry_setup: Vec<DirectoryEntry>,
    /// Records whose enablement changed or that left the directory.
    pub update_lock: Vec<LockUpdate>,
}

impl Delta {
    /// Total number of work items.
    pub fn len(&self) -> usize {
        self.setup.len() + self.retry_setup.len() + self.update_lock.len()
    }

    /// Returns true if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if no email appears in more than one list.
    pub fn is_disjoint(&self) -> bool {
        let mut seen = HashSet::with_capacity(self.len());
        self.setup
            .iter()
            .map(|e| e.email.as_str())
            .chain(self.retry_setup.iter().map(|e| e.email.as_str()))
            .chain(self.update_lock.iter().map(|u| u.email.as_str()))
            .all(|email| seen.insert(email))
    }
}

/// Drops entries whose email or directory id already appeared earlier in the
/// snapshot, keeping the first one.
///
/// Returns the kept entries and the dropped ones.
pub fn dedupe_snapshot(entries: Vec<DirectoryEntry>) -> (Vec<DirectoryEntry>, Vec<DirectoryEntry>) {
    let mut emails = HashSet::with_capacity(entries.len());
    let mut ids = HashSet::with_capacity(entries.len());
    let mut kept = Vec::with_capacity(entries.len());
    let mut dropped = Vec::new();

    for entry in entries {
        if emails.contains(&entry.email) || ids.contains(&entry.directory_id) {
            dropped.push(entry);
            continue;
        }
        emails.insert(entry.email.clone());
        ids.insert(entry.directory_id.clone());
        kept.push(entry);
    }

    (kept, dropped)
}
