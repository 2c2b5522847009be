//! # Sync Driver
//!
//! Runs sync cycles, one at a time.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. pre-check        sync.enabled? session ready?  (else: skipped)     │
//! │  2. directory        list_group_members(group_dn)                      │
//! │  3. filter           exclusion list, malformed emails, duplicates      │
//! │  4. delta            re-associate ids + categorize (one transaction)   │
//! │  5. actions          Setup / RetrySetup / UpdateLock, failures isolated │
//! │  6. re-scan          enroll every active account again (idempotent)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization
//! ```text
//!   scheduler ──► run_exclusive() ──┐
//!                                   ├──► run_lock (tokio Mutex) ──► cycle
//!   trigger() ──► pending slot ─────┘
//!
//!   pending slot: a trigger while a run is queued is absorbed; a trigger
//!   while a run executes queues exactly one follow-up.
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use dirsync_core::delta::dedupe_snapshot;
use dirsync_core::validation::validate_email;
use dirsync_core::DirectoryEntry;
use dirsync_db::AccountRepository;

use crate::action::{actions_from_delta, run_actions, ActionContext, PipelineReport};
use crate::config::ConfigStore;
use crate::directory::DirectoryReader;
use crate::error::SyncResult;
use crate::gate::{ReadyGate, Session};
use crate::membership::{MembershipManager, RescanReport};
use crate::remote::RemoteAccountService;

// =============================================================================
// Reports & Status
// =============================================================================

/// Why a cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// `sync.enabled` is off.
    Disabled,
    /// The remote session is not established yet.
    NotReady,
}

/// Summary of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Entries returned by the directory.
    pub directory_entries: usize,
    pub excluded: usize,
    pub invalid: usize,
    pub duplicates: usize,
    pub reassociated: u64,
    pub actions: PipelineReport,
    pub rescan_checked: usize,
    pub rescan_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
}

/// Point-in-time view of the driver.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub enabled: bool,
    /// A cycle holds the sync lock.
    pub running: bool,
    /// A triggered run is queued.
    pub pending: bool,
    pub last_run: Option<SyncReport>,
    pub last_error: Option<String>,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.enabled { "ON" } else { "OFF" })?;
        if self.running {
            f.write_str(", running...")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct History {
    last_run: Option<SyncReport>,
    last_error: Option<String>,
}

/// Entries that survived filtering, with counts of what was dropped.
struct Filtered {
    entries: Vec<DirectoryEntry>,
    excluded: usize,
    invalid: usize,
    duplicates: usize,
}

// =============================================================================
// Sync Driver
// =============================================================================

pub struct SyncDriver {
    config: Arc<ConfigStore>,
    directory: Arc<dyn DirectoryReader>,
    remote: Arc<dyn RemoteAccountService>,
    accounts: AccountRepository,
    membership: MembershipManager,
    ready: ReadyGate,
    run_lock: Mutex<()>,
    rerun_pending: AtomicBool,
    history: RwLock<History>,
}

impl SyncDriver {
    pub fn new(
        config: Arc<ConfigStore>,
        directory: Arc<dyn DirectoryReader>,
        remote: Arc<dyn RemoteAccountService>,
        accounts: AccountRepository,
        ready: ReadyGate,
    ) -> Self {
        SyncDriver {
            membership: MembershipManager::new(remote.clone()),
            config,
            directory,
            remote,
            accounts,
            ready,
            run_lock: Mutex::new(()),
            rerun_pending: AtomicBool::new(false),
            history: RwLock::new(History::default()),
        }
    }

    /// Requests a cycle without waiting for it.
    ///
    /// Returns false when a triggered run is already queued, in which case
    /// this request is absorbed by it.
    pub fn trigger(self: &Arc<Self>) -> bool {
        if self.rerun_pending.swap(true, Ordering::SeqCst) {
            debug!("Sync already queued, trigger absorbed");
            return false;
        }

        let driver = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = driver.run_lock.lock().await;
            driver.rerun_pending.store(false, Ordering::SeqCst);
            if let Err(e) = driver.run_recorded().await {
                error!(error = %e, "Triggered sync failed");
            }
        });

        info!("Sync triggered");
        true
    }

    /// Waits for the sync lock, then runs one cycle.
    pub async fn run_exclusive(&self) -> SyncResult<SyncOutcome> {
        let _guard = self.run_lock.lock().await;
        self.run_recorded().await
    }

    /// Waits until no cycle is running.
    pub async fn wait_idle(&self) {
        drop(self.run_lock.lock().await);
    }

    pub async fn status(&self) -> SyncStatus {
        let enabled = self
            .config
            .snapshot()
            .map(|c| c.sync.enabled)
            .unwrap_or(false);
        let history = self.history.read().await;

        SyncStatus {
            enabled,
            running: self.run_lock.try_lock().is_err(),
            pending: self.rerun_pending.load(Ordering::SeqCst),
            last_run: history.last_run.clone(),
            last_error: history.last_error.clone(),
        }
    }

    async fn run_recorded(&self) -> SyncResult<SyncOutcome> {
        let run_id = Uuid::new_v4();
        let result = self
            .run_cycle(run_id)
            .instrument(info_span!("sync_cycle", run_id = %run_id))
            .await;

        let mut history = self.history.write().await;
        match &result {
            Ok(SyncOutcome::Completed(report)) => {
                history.last_run = Some(report.clone());
                history.last_error = None;
            }
            Ok(SyncOutcome::Skipped(_)) => {}
            Err(e) => history.last_error = Some(e.to_string()),
        }

        result
    }

    /// One cycle. Must be called with the sync lock held.
    async fn run_cycle(&self, run_id: Uuid) -> SyncResult<SyncOutcome> {
        let config = self.config.snapshot()?;
        if !config.sync.enabled {
            debug!("Sync disabled, skipping cycle");
            return Ok(SyncOutcome::Skipped(SkipReason::Disabled));
        }
        let Some(session) = self.ready.current() else {
            info!("Session not ready, skipping cycle");
            return Ok(SyncOutcome::Skipped(SkipReason::NotReady));
        };

        let started_at = Utc::now();
        let timer = Instant::now();
        info!("Sync cycle starting");

        let entries = self
            .directory
            .list_group_members(&config.directory.group_dn)
            .await?;
        let directory_entries = entries.len();

        let filtered = filter_entries(entries, &config.exclusion_list());
        let outcome = self.accounts.compute_delta(&filtered.entries).await?;
        debug!(
            setup = outcome.delta.setup.len(),
            retry_setup = outcome.delta.retry_setup.len(),
            update_lock = outcome.delta.update_lock.len(),
            reassociated = outcome.reassociated,
            "Delta computed"
        );

        let ctx = ActionContext {
            accounts: self.accounts.clone(),
            remote: self.remote.clone(),
            membership: self.membership.clone(),
            session: session.clone(),
        };
        let actions = actions_from_delta(outcome.delta);
        let pipeline = run_actions(&actions, &ctx).await;

        let rescan = self.rescan(&session).await;

        let report = SyncReport {
            run_id,
            started_at,
            elapsed_ms: u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
            directory_entries,
            excluded: filtered.excluded,
            invalid: filtered.invalid,
            duplicates: filtered.duplicates,
            reassociated: outcome.reassociated,
            actions: pipeline,
            rescan_checked: rescan.checked,
            rescan_failed: rescan.failed,
        };

        info!(
            actions = pipeline.total(),
            failed = pipeline.failed,
            elapsed_ms = report.elapsed_ms,
            "Sync cycle complete"
        );
        Ok(SyncOutcome::Completed(report))
    }

    /// Re-runs enrollment for all active accounts. Failures are logged.
    async fn rescan(&self, session: &Session) -> RescanReport {
        let result: SyncResult<RescanReport> = async {
            let active = self.accounts.list_active().await?;
            self.membership.rescan(session, &active).await
        }
        .await;

        result.unwrap_or_else(|e| {
            warn!(error = %e, "Membership re-scan failed");
            RescanReport::default()
        })
    }
}

/// Applies the exclusion list, drops malformed emails and duplicates.
fn filter_entries(
    entries: Vec<DirectoryEntry>,
    exclusions: &dirsync_core::validation::ExclusionList,
) -> Filtered {
    let mut excluded = 0;
    let mut invalid = 0;

    let candidates: Vec<DirectoryEntry> = entries
        .into_iter()
        .filter(|e| {
            if exclusions.contains(&e.email) {
                excluded += 1;
                return false;
            }
            if let Err(err) = validate_email(&e.email) {
                invalid += 1;
                warn!(email = %e.email, error = %err, "Skipping directory entry");
                return false;
            }
            true
        })
        .collect();

    let (entries, dropped) = dedupe_snapshot(candidates);
    for entry in &dropped {
        warn!(email = %entry.email, directory_id = %entry.directory_id, "Duplicate directory entry dropped");
    }

    Filtered {
        entries,
        excluded,
        invalid,
        duplicates: dropped.len(),
    }
}
