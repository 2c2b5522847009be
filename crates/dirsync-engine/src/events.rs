//! # Remote Event Loop
//!
//! Polls the remote service for events and dispatches them by kind.
//!
//! ```text
//!   wait for ReadyGate ──► loop {
//!                            next_event(poll timeout)
//!                              │
//!                              ├─ None  ──► check shutdown, poll again
//!                              └─ Some  ──► EventDispatcher
//!                                            ├─ BindRequestHandler (spawns)
//!                                            └─ ChannelAdminHandler (inline)
//!                          }
//! ```
//!
//! Handlers run inline on the loop, except the bind handler which hands the
//! request to its own task. A handler error is logged and the loop goes on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use dirsync_db::AccountRepository;

use crate::config::ConfigStore;
use crate::error::{SyncError, SyncResult};
use crate::gate::ReadyGate;
use crate::membership::MembershipManager;
use crate::remote::{EventKind, RemoteAccountService, RemoteEvent};

/// Pause after a failed poll before polling again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(1);

// =============================================================================
// Handlers
// =============================================================================

/// Reacts to one or more event kinds.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Kinds this handler wants.
    fn kinds(&self) -> &[EventKind];

    async fn handle(&self, event: &RemoteEvent) -> SyncResult<()>;
}

/// Routes events to the handlers registered for their kind.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn EventHandler>) {
        for kind in handler.kinds() {
            self.handlers
                .entry(*kind)
                .or_default()
                .push(Arc::clone(&handler));
        }
    }

    /// Runs every handler for the event's kind. Returns how many ran
    /// without error.
    pub async fn dispatch(&self, event: &RemoteEvent) -> usize {
        let Some(handlers) = self.handlers.get(&event.kind()) else {
            debug!(kind = ?event.kind(), "No handler for event");
            return 0;
        };

        let mut handled = 0;
        for handler in handlers {
            match handler.handle(event).await {
                Ok(()) => handled += 1,
                Err(e) => warn!(kind = ?event.kind(), error = %e, "Event handler failed"),
            }
        }
        handled
    }
}

/// Enrolls every active account into a channel once the engine becomes its
/// admin or owner.
pub struct ChannelAdminHandler {
    accounts: AccountRepository,
    membership: MembershipManager,
    ready: ReadyGate,
}

impl ChannelAdminHandler {
    pub fn new(
        accounts: AccountRepository,
        remote: Arc<dyn RemoteAccountService>,
        ready: ReadyGate,
    ) -> Self {
        ChannelAdminHandler {
            accounts,
            membership: MembershipManager::new(remote),
            ready,
        }
    }
}

#[async_trait]
impl EventHandler for ChannelAdminHandler {
    fn kinds(&self) -> &[EventKind] {
        &[EventKind::ChannelMembers]
    }

    async fn handle(&self, event: &RemoteEvent) -> SyncResult<()> {
        let RemoteEvent::ChannelMembers { team_id, changes } = event else {
            return Ok(());
        };
        let Some(session) = self.ready.current() else {
            return Ok(());
        };
        if *team_id != session.team_id {
            return Ok(());
        }

        let promoted = changes.iter().filter(|c| {
            c.account_id == session.own_account_id
                && c.role.is_admin()
                && c.status == crate::remote::MembershipStatus::Active
        });

        for change in promoted {
            info!(channel_id = %change.channel_id, "Channel is now prescribed, enrolling accounts");
            let accounts = self.accounts.list_active().await?;
            let report = self
                .membership
                .rescan_channel(&session, &change.channel_id, &accounts)
                .await?;
            debug!(channel_id = %change.channel_id, ?report, "Channel enrollment done");
        }

        Ok(())
    }
}

// =============================================================================
// Event Loop
// =============================================================================

/// Background task that polls and dispatches remote events.
pub struct EventLoop {
    remote: Arc<dyn RemoteAccountService>,
    config: Arc<ConfigStore>,
    ready: ReadyGate,
    dispatcher: Arc<EventDispatcher>,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for stopping the event loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl EventLoopHandle {
    /// Asks the loop to stop after the current poll.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::Internal("event loop already stopped".into()))
    }
}

impl EventLoop {
    pub fn new(
        remote: Arc<dyn RemoteAccountService>,
        config: Arc<ConfigStore>,
        ready: ReadyGate,
        dispatcher: Arc<EventDispatcher>,
    ) -> (Self, EventLoopHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let event_loop = EventLoop {
            remote,
            config,
            ready,
            dispatcher,
            shutdown_rx,
        };

        (event_loop, EventLoopHandle { shutdown_tx })
    }

    fn poll_timeout(&self) -> Duration {
        self.config
            .snapshot()
            .map(|c| c.event_poll_timeout())
            .unwrap_or(Duration::from_millis(50))
    }

    /// Runs until shutdown. Spawn this as a background task.
    pub async fn run(mut self) {
        tokio::select! {
            _ = self.ready.wait_ready() => {}
            _ = self.shutdown_rx.recv() => {
                info!("Event loop stopped before session was ready");
                return;
            }
        }

        info!("Event loop starting");

        loop {
            let timeout = self.poll_timeout();

            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Event loop shutting down");
                    break;
                }

                polled = self.remote.next_event(timeout) => match polled {
                    Ok(Some(event)) => {
                        self.dispatcher.dispatch(&event).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(error = %e, "Failed to poll remote events");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        info!("Event loop stopped");
    }
}
