//! # Delta Computation
//!
//! Compares a directory snapshot with the tracked records inside a single
//! transaction.
//!
//! ## Transaction Steps
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SINGLE TRANSACTION                                 │
//! │                                                                         │
//! │  1. CREATE TEMP TABLE directory_snapshot; INSERT every entry           │
//! │                                                                         │
//! │  2. Re-associate: records whose email is in the snapshot under a       │
//! │     different directory_id take the snapshot's id                      │
//! │                                                                         │
//! │  3. Categorize (records matched on directory_id):                      │
//! │     setup        enabled, no record by id, no record by email          │
//! │     retry_setup  enabled, record is directory_locked                   │
//! │     update_lock  (a) enabled differs (except enabled+directory_locked, │
//! │                      which is retry_setup)                              │
//! │                  (b) record enabled but missing from the snapshot      │
//! │                                                                         │
//! │  4. DROP the temp table, COMMIT                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The snapshot must not repeat an email or a directory id; see
//! [`dirsync_core::delta::dedupe_snapshot`].

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use tracing::{debug, info};

use dirsync_core::{Delta, DirectoryEntry, LockState, LockUpdate};

use crate::error::DbResult;
use crate::repository::account::AccountRepository;

/// Result of one delta computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// Work lists for the action pipeline.
    pub delta: Delta,
    /// Number of records whose directory_id was re-associated.
    pub reassociated: u64,
}

type EntryRow = (String, String, bool);
type LockRow = (String, String, bool, LockState, bool);

impl AccountRepository {
    /// Computes the delta between `entries` and the tracked records.
    ///
    /// Re-association is written and committed together with the read of
    /// the work lists, so the lists always see the reconciled ids.
    pub async fn compute_delta(&self, entries: &[DirectoryEntry]) -> DbResult<DeltaOutcome> {
        let mut tx = self.pool.begin().await?;

        load_snapshot(&mut tx, entries).await?;
        let reassociated = reassociate(&mut tx).await?;

        let setup = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT s.directory_id, s.email, s.enabled
            FROM directory_snapshot s
            WHERE s.enabled = 1
              AND NOT EXISTS (SELECT 1 FROM accounts a WHERE a.directory_id = s.directory_id)
              AND NOT EXISTS (SELECT 1 FROM accounts a WHERE a.email = s.email)
            ORDER BY s.email
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let retry_setup = sqlx::query_as::<_, EntryRow>(
            r#"
            SELECT s.directory_id, a.email, s.enabled
            FROM directory_snapshot s
            JOIN accounts a ON a.directory_id = s.directory_id
            WHERE s.enabled = 1
              AND a.lock_state = ?1
            ORDER BY a.email
            "#,
        )
        .bind(LockState::DirectoryLocked)
        .fetch_all(&mut *tx)
        .await?;

        let update_lock = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT a.email, a.directory_id, s.enabled, a.lock_state, 0 AS vanished
            FROM accounts a
            JOIN directory_snapshot s ON s.directory_id = a.directory_id
            WHERE a.enabled <> s.enabled
              AND NOT (s.enabled = 1 AND a.lock_state = ?1)
            UNION ALL
            SELECT a.email, a.directory_id, 0, a.lock_state, 1 AS vanished
            FROM accounts a
            WHERE a.enabled = 1
              AND NOT EXISTS (
                  SELECT 1 FROM directory_snapshot s WHERE s.directory_id = a.directory_id
              )
            ORDER BY 1
            "#,
        )
        .bind(LockState::DirectoryLocked)
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DROP TABLE IF EXISTS temp.directory_snapshot")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let delta = Delta {
            setup: setup.into_iter().map(entry_from_row).collect(),
            retry_setup: retry_setup.into_iter().map(entry_from_row).collect(),
            update_lock: update_lock
                .into_iter()
                .map(|(email, directory_id, enabled, lock_state, vanished)| LockUpdate {
                    email,
                    directory_id,
                    enabled,
                    lock_state,
                    vanished,
                })
                .collect(),
        };

        info!(
            entries = entries.len(),
            reassociated,
            setup = delta.setup.len(),
            retry_setup = delta.retry_setup.len(),
            update_lock = delta.update_lock.len(),
            "Delta computed"
        );

        Ok(DeltaOutcome {
            delta,
            reassociated,
        })
    }
}

fn entry_from_row((directory_id, email, enabled): EntryRow) -> DirectoryEntry {
    DirectoryEntry {
        directory_id,
        email,
        enabled,
    }
}

/// Creates the per-transaction snapshot table and fills it.
async fn load_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[DirectoryEntry],
) -> DbResult<()> {
    sqlx::query("DROP TABLE IF EXISTS temp.directory_snapshot")
        .execute(&mut **tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TEMP TABLE directory_snapshot (
            directory_id TEXT NOT NULL,
            email        TEXT NOT NULL,
            enabled      INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut **tx)
    .await?;

    for entry in entries {
        sqlx::query(
            "INSERT INTO temp.directory_snapshot (directory_id, email, enabled) VALUES (?1, ?2, ?3)",
        )
        .bind(&entry.directory_id)
        .bind(&entry.email)
        .bind(entry.enabled)
        .execute(&mut **tx)
        .await?;
    }

    debug!(count = entries.len(), "Directory snapshot loaded");
    Ok(())
}

/// Points records at the directory_id the directory now reports for their
/// email. Returns the number of records changed.
async fn reassociate(tx: &mut Transaction<'_, Sqlite>) -> DbResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE accounts SET
            directory_id = (
                SELECT s.directory_id FROM directory_snapshot s WHERE s.email = accounts.email
            ),
            updated_at = ?1
        WHERE EXISTS (
            SELECT 1 FROM directory_snapshot s
            WHERE s.email = accounts.email
              AND s.directory_id <> accounts.directory_id
        )
        "#,
    )
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    let changed = result.rows_affected();
    if changed > 0 {
        info!(changed, "Re-associated directory ids");
    }
    Ok(changed)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use dirsync_core::AccountCredentials;

    async fn repo() -> AccountRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().accounts()
    }

    fn creds(id: &str) -> AccountCredentials {
        AccountCredentials {
            remote_account_id: id.to_string(),
            credential_secret: "pw".to_string(),
            recovery_secret: "l2".to_string(),
        }
    }

    async fn unlocked(repo: &AccountRepository, id: &str, email: &str, enabled: bool) {
        repo.create_provisioned(&DirectoryEntry::new(id, email, enabled), &creds(id))
            .await
            .unwrap();
    }

    async fn fully_locked(repo: &AccountRepository, id: &str, email: &str) {
        unlocked(repo, id, email, false).await;
        repo.apply_lock_update(email, false, LockState::Unlocked, LockState::FullyLocked)
            .await
            .unwrap();
    }

    async fn claimed(repo: &AccountRepository, id: &str, email: &str, enabled: bool) {
        repo.create_directory_locked(&DirectoryEntry::new(id, email, enabled))
            .await
            .unwrap();
    }

    fn emails(entries: &[DirectoryEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.email.as_str()).collect()
    }

    #[tokio::test]
    async fn test_new_member_is_set_up() {
        let repo = repo().await;
        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("2", "alice@x.com", true)])
            .await
            .unwrap();

        assert_eq!(emails(&outcome.delta.setup), vec!["alice@x.com"]);
        assert!(outcome.delta.retry_setup.is_empty());
        assert!(outcome.delta.update_lock.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_new_member_is_ignored() {
        let repo = repo().await;
        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("5", "carl@x.com", false)])
            .await
            .unwrap();

        assert!(outcome.delta.is_empty());
    }

    #[tokio::test]
    async fn test_directory_locked_member_is_retried() {
        let repo = repo().await;
        claimed(&repo, "2", "alice@x.com", true).await;

        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("2", "alice@x.com", true)])
            .await
            .unwrap();

        assert_eq!(emails(&outcome.delta.retry_setup), vec!["alice@x.com"]);
        assert!(outcome.delta.setup.is_empty());
        assert!(outcome.delta.update_lock.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_member_gets_lock_update() {
        let repo = repo().await;
        unlocked(&repo, "4", "bob@x.com", true).await;

        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("4", "bob@x.com", false)])
            .await
            .unwrap();

        assert_eq!(
            outcome.delta.update_lock,
            vec![LockUpdate {
                email: "bob@x.com".to_string(),
                directory_id: "4".to_string(),
                enabled: false,
                lock_state: LockState::Unlocked,
                vanished: false,
            }]
        );
        assert!(outcome.delta.setup.is_empty());
        assert!(outcome.delta.retry_setup.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_member_gets_lock_update() {
        let repo = repo().await;
        unlocked(&repo, "6", "carol@x.com", true).await;
        unlocked(&repo, "2", "alice@x.com", true).await;

        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("2", "alice@x.com", true)])
            .await
            .unwrap();

        assert_eq!(outcome.delta.update_lock.len(), 1);
        let carol = &outcome.delta.update_lock[0];
        assert_eq!(carol.email, "carol@x.com");
        assert!(!carol.enabled);
        assert!(carol.vanished);
    }

    #[tokio::test]
    async fn test_vanished_disabled_member_is_left_alone() {
        let repo = repo().await;
        fully_locked(&repo, "6", "carol@x.com").await;

        let outcome = repo.compute_delta(&[]).await.unwrap();
        assert!(outcome.delta.is_empty());
    }

    #[tokio::test]
    async fn test_reenabled_member_is_unlocked() {
        let repo = repo().await;
        fully_locked(&repo, "4", "bob@x.com").await;

        let outcome = repo
            .compute_delta(&[DirectoryEntry::new("4", "bob@x.com", true)])
            .await
            .unwrap();

        assert_eq!(outcome.delta.update_lock.len(), 1);
        assert!(outcome.delta.update_lock[0].enabled);
        assert_eq!(
            outcome.delta.update_lock[0].lock_state,
            LockState::FullyLocked
        );
    }

    #[tokio::test]
    async fn test_recreated_identity_is_reassociated_not_set_up() {
        let repo = repo().await;
        unlocked(&repo, "old-id", "alice@x.com", true).await;

        let snapshot = [DirectoryEntry::new("new-id", "alice@x.com", true)];
        let outcome = repo.compute_delta(&snapshot).await.unwrap();

        assert_eq!(outcome.reassociated, 1);
        assert!(outcome.delta.is_empty());
        assert_eq!(
            repo.require("alice@x.com").await.unwrap().directory_id,
            "new-id"
        );
    }

    #[tokio::test]
    async fn test_reassociation_is_idempotent() {
        let repo = repo().await;
        unlocked(&repo, "old-id", "alice@x.com", true).await;
        claimed(&repo, "old-mark", "mark@x.com", true).await;

        let snapshot = [
            DirectoryEntry::new("new-id", "alice@x.com", true),
            DirectoryEntry::new("new-mark", "mark@x.com", true),
        ];

        let first = repo.compute_delta(&snapshot).await.unwrap();
        let second = repo.compute_delta(&snapshot).await.unwrap();

        assert_eq!(first.reassociated, 2);
        assert_eq!(second.reassociated, 0);
        assert_eq!(first.delta, second.delta);
        assert_eq!(emails(&second.delta.retry_setup), vec!["mark@x.com"]);
    }

    #[tokio::test]
    async fn test_partition_is_disjoint() {
        let repo = repo().await;
        // enable@: claimed, cached disabled, directory enabled -> retry only
        claimed(&repo, "10", "enable@x.com", false).await;
        // mark@: claimed, cached enabled, directory disabled -> lock update only
        claimed(&repo, "11", "mark@x.com", true).await;
        unlocked(&repo, "12", "bob@x.com", true).await;
        unlocked(&repo, "13", "gone@x.com", true).await;
        unlocked(&repo, "14", "steady@x.com", true).await;
        fully_locked(&repo, "15", "back@x.com").await;

        let snapshot = [
            DirectoryEntry::new("10", "enable@x.com", true),
            DirectoryEntry::new("11", "mark@x.com", false),
            DirectoryEntry::new("12", "bob@x.com", false),
            DirectoryEntry::new("14", "steady@x.com", true),
            DirectoryEntry::new("15", "back@x.com", true),
            DirectoryEntry::new("16", "new@x.com", true),
        ];

        let delta = repo.compute_delta(&snapshot).await.unwrap().delta;

        assert!(delta.is_disjoint());
        assert_eq!(emails(&delta.setup), vec!["new@x.com"]);
        assert_eq!(emails(&delta.retry_setup), vec!["enable@x.com"]);

        let locked: Vec<&str> = delta.update_lock.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(
            locked,
            vec!["back@x.com", "bob@x.com", "gone@x.com", "mark@x.com"]
        );

        let mark = delta
            .update_lock
            .iter()
            .find(|u| u.email == "mark@x.com")
            .unwrap();
        assert_eq!(mark.lock_state, LockState::DirectoryLocked);
        assert!(!mark.enabled);
    }

    #[tokio::test]
    async fn test_snapshot_table_is_dropped() {
        let repo = repo().await;
        repo.compute_delta(&[DirectoryEntry::new("1", "a@x.com", true)])
            .await
            .unwrap();

        let leftover: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_temp_master WHERE name = 'directory_snapshot'",
        )
        .fetch_one(&repo.pool)
        .await
        .unwrap();
        assert_eq!(leftover, 0);
    }
}
