//! # Account Repository
//!
//! CRUD for tracked accounts, keyed by email.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  caller                 method                    lock_state guard      │
//! │  ─────────────────────  ────────────────────────  ──────────────────── │
//! │  Setup (ok)             create_provisioned        row must not exist   │
//! │  Setup (collision)      create_directory_locked   row must not exist   │
//! │  RetrySetup (ok)        complete_retry_setup      directory_locked     │
//! │  Bind link              link_claimed              directory_locked +   │
//! │                                                   enabled              │
//! │  UpdateLock             apply_lock_update         state seen in delta  │
//! │  Sync re-association    compute_delta (delta.rs)  -                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use dirsync_core::{AccountCredentials, AccountRecord, DirectoryEntry, LockState};

use crate::error::{DbError, DbResult};

/// Repository for account operations.
#[derive(Debug, Clone)]
pub struct AccountRepository {
    pub(crate) pool: SqlitePool,
}

impl AccountRepository {
    /// Creates a new AccountRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AccountRepository { pool }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a record by email.
    pub async fn get(&self, email: &str) -> DbResult<Option<AccountRecord>> {
        let record = sqlx::query_as::<_, AccountRecord>("SELECT * FROM accounts WHERE email = ?1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Gets a record by email, failing with `NotFound` if it is missing.
    pub async fn require(&self, email: &str) -> DbResult<AccountRecord> {
        self.get(email)
            .await?
            .ok_or_else(|| DbError::not_found("Account", email))
    }

    /// Lists every tracked record, ordered by email.
    pub async fn list(&self) -> DbResult<Vec<AccountRecord>> {
        let records = sqlx::query_as::<_, AccountRecord>("SELECT * FROM accounts ORDER BY email")
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    /// Lists enabled, unlocked records that own a remote account.
    ///
    /// These are the accounts membership reconciliation works on.
    pub async fn list_active(&self) -> DbResult<Vec<AccountRecord>> {
        let records = sqlx::query_as::<_, AccountRecord>(
            r#"
            SELECT * FROM accounts
            WHERE enabled = 1
              AND lock_state = ?1
              AND remote_account_id IS NOT NULL
            ORDER BY email
            "#,
        )
        .bind(LockState::Unlocked)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Creates an UNLOCKED record for a freshly provisioned account.
    pub async fn create_provisioned(
        &self,
        entry: &DirectoryEntry,
        credentials: &AccountCredentials,
    ) -> DbResult<AccountRecord> {
        debug!(email = %entry.email, "Creating provisioned account record");

        self.insert(
            entry,
            Some(credentials.remote_account_id.as_str()),
            Some(credentials.credential_secret.as_str()),
            Some(credentials.recovery_secret.as_str()),
            LockState::Unlocked,
        )
        .await
    }

    /// Creates a DIRECTORY_LOCKED record after a naming collision.
    ///
    /// The record carries no credentials and no remote account id.
    pub async fn create_directory_locked(&self, entry: &DirectoryEntry) -> DbResult<AccountRecord> {
        debug!(email = %entry.email, "Creating directory-locked account record");

        self.insert(entry, None, None, None, LockState::DirectoryLocked)
            .await
    }

    async fn insert(
        &self,
        entry: &DirectoryEntry,
        remote_account_id: Option<&str>,
        credential_secret: Option<&str>,
        recovery_secret: Option<&str>,
        lock_state: LockState,
    ) -> DbResult<AccountRecord> {
        let now = Utc::now();

        let record = AccountRecord {
            email: entry.email.clone(),
            directory_id: entry.directory_id.clone(),
            enabled: entry.enabled,
            remote_account_id: remote_account_id.map(str::to_string),
            credential_secret: credential_secret.map(str::to_string),
            recovery_secret: recovery_secret.map(str::to_string),
            lock_state,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO accounts (
                email, directory_id, enabled, remote_account_id,
                credential_secret, recovery_secret, lock_state,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&record.email)
        .bind(&record.directory_id)
        .bind(record.enabled)
        .bind(&record.remote_account_id)
        .bind(&record.credential_secret)
        .bind(&record.recovery_secret)
        .bind(record.lock_state)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("email", &record.email),
            other => other,
        })?;

        Ok(record)
    }

    // =========================================================================
    // Guarded Updates
    // =========================================================================

    /// Moves a DIRECTORY_LOCKED record to UNLOCKED after provisioning
    /// succeeded on retry. Also marks the record enabled.
    ///
    /// ## Returns
    /// * `Ok(true)` - record updated
    /// * `Ok(false)` - no DIRECTORY_LOCKED record with this email
    pub async fn complete_retry_setup(
        &self,
        email: &str,
        credentials: &AccountCredentials,
    ) -> DbResult<bool> {
        self.promote_claimed(email, credentials, false).await
    }

    /// Moves a DIRECTORY_LOCKED record to UNLOCKED after the end user linked
    /// their account. Only enabled records qualify.
    pub async fn link_claimed(
        &self,
        email: &str,
        credentials: &AccountCredentials,
    ) -> DbResult<bool> {
        self.promote_claimed(email, credentials, true).await
    }

    async fn promote_claimed(
        &self,
        email: &str,
        credentials: &AccountCredentials,
        require_enabled: bool,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                remote_account_id = ?1,
                credential_secret = ?2,
                recovery_secret = ?3,
                lock_state = ?4,
                enabled = 1,
                updated_at = ?5
            WHERE email = ?6
              AND lock_state = ?7
              AND (?8 = 0 OR enabled = 1)
            "#,
        )
        .bind(&credentials.remote_account_id)
        .bind(&credentials.credential_secret)
        .bind(&credentials.recovery_secret)
        .bind(LockState::Unlocked)
        .bind(Utc::now())
        .bind(email)
        .bind(LockState::DirectoryLocked)
        .bind(require_enabled)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() == 1;
        debug!(email = %email, updated, "Promoted directory-locked record");
        Ok(updated)
    }

    /// Persists a lock update if the record is still in `expected` state.
    ///
    /// ## Returns
    /// * `Ok(true)` - enabled flag and lock state written
    /// * `Ok(false)` - record missing or its state changed concurrently
    pub async fn apply_lock_update(
        &self,
        email: &str,
        enabled: bool,
        expected: LockState,
        next: LockState,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE accounts SET
                enabled = ?1,
                lock_state = ?2,
                updated_at = ?3
            WHERE email = ?4 AND lock_state = ?5
            "#,
        )
        .bind(enabled)
        .bind(next)
        .bind(Utc::now())
        .bind(email)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
