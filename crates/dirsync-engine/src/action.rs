//! # Action Pipeline
//!
//! Turns a [`Delta`] into typed actions and executes them one by one.
//!
//! ## Action Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Setup(entry)                                                          │
//! │    provision ──ok──► create UNLOCKED record ──► enroll team/channels   │
//! │        │                                                                │
//! │        └─collision─► set_lock(DirectoryLock) ──► create DIRECTORY_LOCKED│
//! │                      (lock failure: no record, retried next cycle)      │
//! │                                                                         │
//! │  RetrySetup(entry)                                                     │
//! │    provision ──ok──► lookup id ──► promote to UNLOCKED ──► enroll      │
//! │        │                                                                │
//! │        └─collision─► nothing to do (name still claimed)                 │
//! │                                                                         │
//! │  UpdateLock(update)                                                    │
//! │    DIRECTORY_LOCKED: persist enabled only, no remote call              │
//! │    otherwise:        set_lock(Unlock | FullLock) ──► persist           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Isolation
//! [`run_actions`] never stops early. A failing action is logged and
//! counted, and the next action runs. Whatever the failed action left
//! undone is picked up again by the next delta.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use dirsync_core::lock::plan_lock_update;
use dirsync_core::{Delta, DirectoryEntry, LockState, LockType, LockUpdate};
use dirsync_db::AccountRepository;

use crate::error::{SyncError, SyncResult};
use crate::gate::Session;
use crate::membership::MembershipManager;
use crate::remote::{RemoteAccountService, RemoteError};

// =============================================================================
// Actions
// =============================================================================

/// Action kinds, used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Setup,
    RetrySetup,
    UpdateLock,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Setup => write!(f, "setup"),
            ActionKind::RetrySetup => write!(f, "retry_setup"),
            ActionKind::UpdateLock => write!(f, "update_lock"),
        }
    }
}

/// One unit of work derived from a delta entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Setup(DirectoryEntry),
    RetrySetup(DirectoryEntry),
    UpdateLock(LockUpdate),
}

/// Everything an action needs to run.
#[derive(Clone)]
pub struct ActionContext {
    pub accounts: AccountRepository,
    pub remote: Arc<dyn RemoteAccountService>,
    pub membership: MembershipManager,
    pub session: Session,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Setup(_) => ActionKind::Setup,
            Action::RetrySetup(_) => ActionKind::RetrySetup,
            Action::UpdateLock(_) => ActionKind::UpdateLock,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Action::Setup(entry) | Action::RetrySetup(entry) => &entry.email,
            Action::UpdateLock(update) => &update.email,
        }
    }

    /// Runs the action.
    pub async fn execute(&self, ctx: &ActionContext) -> SyncResult<()> {
        match self {
            Action::Setup(entry) => setup(ctx, entry).await,
            Action::RetrySetup(entry) => retry_setup(ctx, entry).await,
            Action::UpdateLock(update) => update_lock(ctx, update).await,
        }
    }
}

/// Converts a delta to actions: setups, then retries, then lock updates.
pub fn actions_from_delta(delta: Delta) -> Vec<Action> {
    let Delta {
        setup,
        retry_setup,
        update_lock,
    } = delta;

    setup
        .into_iter()
        .map(Action::Setup)
        .chain(retry_setup.into_iter().map(Action::RetrySetup))
        .chain(update_lock.into_iter().map(Action::UpdateLock))
        .collect()
}

// =============================================================================
// Action Implementations
// =============================================================================

async fn setup(ctx: &ActionContext, entry: &DirectoryEntry) -> SyncResult<()> {
    match ctx.remote.provision(&entry.email).await {
        Ok(credentials) => {
            ctx.accounts.create_provisioned(entry, &credentials).await?;
            info!(email = %entry.email, "Provisioned account");
            enroll(ctx, &entry.email, &credentials.remote_account_id).await;
            Ok(())
        }
        Err(RemoteError::Collision(_)) => {
            ctx.remote
                .set_lock(&entry.email, LockType::DirectoryLock)
                .await?;
            ctx.accounts.create_directory_locked(entry).await?;
            info!(email = %entry.email, "Name already taken, account is now directory-locked");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn retry_setup(ctx: &ActionContext, entry: &DirectoryEntry) -> SyncResult<()> {
    let mut credentials = match ctx.remote.provision(&entry.email).await {
        Ok(credentials) => credentials,
        Err(RemoteError::Collision(_)) => {
            debug!(email = %entry.email, "Name still claimed, leaving directory-locked");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    credentials.remote_account_id = ctx.remote.lookup_account_id(&entry.email).await?;

    if !ctx
        .accounts
        .complete_retry_setup(&entry.email, &credentials)
        .await?
    {
        return Err(SyncError::StaleRecord {
            email: entry.email.clone(),
            expected: LockState::DirectoryLocked.to_string(),
        });
    }

    info!(email = %entry.email, "Name released, account provisioned on retry");
    enroll(ctx, &entry.email, &credentials.remote_account_id).await;
    Ok(())
}

async fn update_lock(ctx: &ActionContext, update: &LockUpdate) -> SyncResult<()> {
    let plan = plan_lock_update(update.lock_state, update.enabled);

    if let Some(lock) = plan.remote_call {
        ctx.remote.set_lock(&update.email, lock).await?;
    } else {
        debug!(email = %update.email, "Directory-locked, skipping remote lock call");
    }

    let applied = ctx
        .accounts
        .apply_lock_update(&update.email, update.enabled, update.lock_state, plan.next_state)
        .await?;

    if !applied {
        return Err(SyncError::StaleRecord {
            email: update.email.clone(),
            expected: update.lock_state.to_string(),
        });
    }

    info!(
        email = %update.email,
        enabled = update.enabled,
        vanished = update.vanished,
        lock_state = %plan.next_state,
        "Lock updated"
    );
    Ok(())
}

/// Enrollment failures never fail the action: the post-cycle re-scan
/// repeats the step.
async fn enroll(ctx: &ActionContext, email: &str, account_id: &str) {
    if let Err(e) = ctx.membership.enroll_one(&ctx.session, account_id).await {
        warn!(email = %email, error = %e, "Failed to add account to team and channels");
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Per-kind counts for one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub setup: usize,
    pub retry_setup: usize,
    pub update_lock: usize,
    pub failed: usize,
}

impl PipelineReport {
    pub fn total(&self) -> usize {
        self.setup + self.retry_setup + self.update_lock
    }

    fn record(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Setup => self.setup += 1,
            ActionKind::RetrySetup => self.retry_setup += 1,
            ActionKind::UpdateLock => self.update_lock += 1,
        }
    }
}

/// Executes `actions` in order. A failure never stops the batch.
pub async fn run_actions(actions: &[Action], ctx: &ActionContext) -> PipelineReport {
    let mut report = PipelineReport::default();

    for action in actions {
        report.record(action.kind());

        if let Err(e) = action.execute(ctx).await {
            report.failed += 1;
            warn!(
                kind = %action.kind(),
                email = %action.email(),
                error = %e,
                retryable = e.is_retryable(),
                "Action failed"
            );
        }
    }

    report
}
