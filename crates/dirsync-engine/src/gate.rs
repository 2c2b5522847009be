//! Readiness gate shared by the driver, the event loop and bind workers.
//!
//! Nothing that talks to the remote service runs before the session
//! bootstrap has resolved which team the engine manages. The gate carries
//! that [`Session`] once it is known.

use std::sync::Arc;
use tokio::sync::watch;

/// The remote session the engine operates in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// The single team the engine administers.
    pub team_id: String,
    /// The engine's own account id.
    pub own_account_id: String,
}

/// Shared readiness signal. Cloning shares the same gate.
#[derive(Debug, Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<Option<Session>>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        ReadyGate { tx: Arc::new(tx) }
    }

    /// Opens the gate with the resolved session.
    pub fn set_ready(&self, session: Session) {
        self.tx.send_replace(Some(session));
    }

    /// Returns the session if the gate is open.
    pub fn current(&self) -> Option<Session> {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Waits until the gate opens and returns the session.
    pub async fn wait_ready(&self) -> Session {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(session) = rx.borrow_and_update().clone() {
                return session;
            }
            // The sender lives in self, so the channel cannot close here
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
