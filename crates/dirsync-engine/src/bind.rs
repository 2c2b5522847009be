//! # Bind/Link Protocol Handler
//!
//! Lets an end user claim their account by proving their directory
//! password. The directory password is checked here and never leaves the
//! engine; the remote service only sees the exchange token.
//!
//! ## Request Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  bind request {username, password, secureExchangeToken, level2Secret?} │
//! │                                                                         │
//! │  record missing or disabled ───────────────────────────► reject        │
//! │                                                                         │
//! │  level2Secret present (LINK)                                           │
//! │    record DIRECTORY_LOCKED? ──no──► reject                             │
//! │    directory auth ok?        ──no──► reject (logged only)              │
//! │    link_account ─► lookup id ─► record UNLOCKED ─► enroll              │
//! │                                                                         │
//! │  level2Secret absent (DEVICE APPROVAL)                                 │
//! │    record UNLOCKED?          ──no──► reject                            │
//! │    directory auth ok?        ──no──► reject (logged only)              │
//! │    bind_response(token, stored recovery secret)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each request runs on its own task so a slow directory bind never stalls
//! the event loop. Rejections produce no reply. Nothing is retried: the
//! user's client sends a new request.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use dirsync_core::lock::require_state;
use dirsync_core::{AccountCredentials, AccountRecord, LockState};
use dirsync_db::AccountRepository;

use crate::directory::DirectoryReader;
use crate::error::{SyncError, SyncResult};
use crate::events::EventHandler;
use crate::gate::ReadyGate;
use crate::membership::MembershipManager;
use crate::remote::{BindRequest, EventKind, RemoteAccountService, RemoteEvent};

/// What happened to a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// A directory-locked record was linked and is now UNLOCKED.
    Linked,
    /// A new device was approved for a linked account.
    DeviceApproved,
    /// The request was refused. The reason is only logged.
    Rejected(String),
}

// =============================================================================
// Bind Processor
// =============================================================================

/// Runs the bind/link state machine for single requests.
pub struct BindProcessor {
    accounts: AccountRepository,
    directory: Arc<dyn DirectoryReader>,
    remote: Arc<dyn RemoteAccountService>,
    membership: MembershipManager,
    ready: ReadyGate,
}

impl BindProcessor {
    pub fn new(
        accounts: AccountRepository,
        directory: Arc<dyn DirectoryReader>,
        remote: Arc<dyn RemoteAccountService>,
        ready: ReadyGate,
    ) -> Self {
        BindProcessor {
            membership: MembershipManager::new(remote.clone()),
            accounts,
            directory,
            remote,
            ready,
        }
    }

    /// Processes one bind request to completion.
    pub async fn process(&self, request: &BindRequest) -> SyncResult<BindOutcome> {
        let email = request.username.trim();

        let record = match self.accounts.get(email).await? {
            Some(record) if record.enabled => record,
            Some(_) => return Ok(reject("account is disabled")),
            None => return Ok(reject("no such account")),
        };

        match request.level2_secret.as_deref() {
            Some(level2) => self.link(&record, request, level2).await,
            None => self.approve_device(&record, request).await,
        }
    }

    async fn link(
        &self,
        record: &AccountRecord,
        request: &BindRequest,
        level2: &str,
    ) -> SyncResult<BindOutcome> {
        if let Err(e) = require_state(record, LockState::DirectoryLocked, LockState::Unlocked) {
            return Ok(reject(&e.to_string()));
        }

        if !self.authenticate(record, request).await? {
            return Ok(reject("directory authentication failed"));
        }

        let credential_secret = self
            .remote
            .link_account(&record.email, &request.secure_exchange_token, Some(level2))
            .await?;
        let remote_account_id = self.remote.lookup_account_id(&record.email).await?;

        let credentials = AccountCredentials {
            remote_account_id,
            credential_secret,
            recovery_secret: level2.to_string(),
        };

        if !self.accounts.link_claimed(&record.email, &credentials).await? {
            return Err(SyncError::StaleRecord {
                email: record.email.clone(),
                expected: LockState::DirectoryLocked.to_string(),
            });
        }
        info!(email = %record.email, "Account linked");

        match self.ready.current() {
            Some(session) => {
                if let Err(e) = self
                    .membership
                    .enroll_one(&session, &credentials.remote_account_id)
                    .await
                {
                    warn!(email = %record.email, error = %e, "Failed to add linked account to team and channels");
                }
            }
            None => debug!(email = %record.email, "Session not ready, enrollment left to the re-scan"),
        }

        Ok(BindOutcome::Linked)
    }

    async fn approve_device(
        &self,
        record: &AccountRecord,
        request: &BindRequest,
    ) -> SyncResult<BindOutcome> {
        if let Err(e) = require_state(record, LockState::Unlocked, LockState::Unlocked) {
            return Ok(reject(&e.to_string()));
        }
        let Some(recovery) = record.recovery_secret.as_deref() else {
            return Ok(reject("account has no recovery secret"));
        };

        if !self.authenticate(record, request).await? {
            return Ok(reject("directory authentication failed"));
        }

        self.remote
            .bind_response(&record.email, &request.secure_exchange_token, recovery)
            .await?;

        info!(email = %record.email, "New device approved");
        Ok(BindOutcome::DeviceApproved)
    }

    async fn authenticate(&self, record: &AccountRecord, request: &BindRequest) -> SyncResult<bool> {
        self.directory
            .authenticate(&record.email, &request.password)
            .await
    }
}

fn reject(reason: &str) -> BindOutcome {
    BindOutcome::Rejected(reason.to_string())
}

// =============================================================================
// Event Handler
// =============================================================================

/// Event handler that runs each bind request on its own task.
pub struct BindRequestHandler {
    processor: Arc<BindProcessor>,
    workers: Mutex<JoinSet<()>>,
}

impl BindRequestHandler {
    pub fn new(processor: BindProcessor) -> Self {
        BindRequestHandler {
            processor: Arc::new(processor),
            workers: Mutex::new(JoinSet::new()),
        }
    }

    /// Starts a worker for `request` and returns at once.
    pub fn spawn(&self, request: BindRequest) -> SyncResult<()> {
        let processor = Arc::clone(&self.processor);

        let mut workers = self
            .workers
            .lock()
            .map_err(|_| SyncError::Internal("bind worker lock poisoned".into()))?;
        while workers.try_join_next().is_some() {}

        workers.spawn(async move {
            match processor.process(&request).await {
                Ok(BindOutcome::Rejected(reason)) => {
                    info!(username = %request.username, reason = %reason, "Bind request rejected")
                }
                Ok(outcome) => debug!(username = %request.username, ?outcome, "Bind request done"),
                Err(e) => warn!(username = %request.username, error = %e, "Bind request failed"),
            }
        });

        Ok(())
    }

    /// Number of workers not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.workers.lock().map(|w| w.len()).unwrap_or(0)
    }

    /// Waits for every in-flight worker. Workers are never cancelled.
    pub async fn drain(&self) {
        let mut workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(_) => return,
        };

        let count = workers.len();
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Bind worker panicked");
            }
        }
        if count > 0 {
            debug!(count, "Bind workers drained");
        }
    }
}

#[async_trait]
impl EventHandler for BindRequestHandler {
    fn kinds(&self) -> &[EventKind] {
        &[EventKind::BindRequest]
    }

    async fn handle(&self, event: &RemoteEvent) -> SyncResult<()> {
        if let RemoteEvent::BindRequest(request) = event {
            self.spawn(request.clone())?;
        }
        Ok(())
    }
}
