//! # Session Bootstrap
//!
//! Resolves the team the engine manages and opens the [`ReadyGate`].
//!
//! The engine's own account must belong to exactly one team and be an
//! active admin or owner there. Until that holds, bootstrap keeps retrying
//! with exponential backoff:
//!
//! ```text
//!   Attempt 1: 1s
//!   Attempt 2: 2s
//!   Attempt 3: 4s
//!   ...
//!   Max: 60s
//! ```

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::gate::{ReadyGate, Session};
use crate::remote::RemoteAccountService;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Background task that waits for a usable remote session.
pub struct SessionBootstrap {
    remote: Arc<dyn RemoteAccountService>,
    ready: ReadyGate,
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for cancelling the bootstrap.
#[derive(Clone)]
pub struct SessionBootstrapHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SessionBootstrapHandle {
    /// Cancels the bootstrap if it is still retrying. Returns quietly if it
    /// already finished.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

impl SessionBootstrap {
    pub fn new(
        remote: Arc<dyn RemoteAccountService>,
        ready: ReadyGate,
    ) -> (Self, SessionBootstrapHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            SessionBootstrap {
                remote,
                ready,
                shutdown_rx,
            },
            SessionBootstrapHandle { shutdown_tx },
        )
    }

    /// Looks up our account, our single team, and our role in it.
    pub async fn resolve(&self) -> SyncResult<Session> {
        let own_account_id = self.remote.own_account_id().await?;

        let mut teams = self.remote.teams().await?;
        if teams.len() != 1 {
            return Err(SyncError::SessionNotReady(format!(
                "engine account must belong to exactly one team, found {}",
                teams.len()
            )));
        }
        let team = teams.remove(0);

        let members = self.remote.team_members(&team.team_id).await?;
        let is_admin = members
            .iter()
            .any(|m| m.account_id == own_account_id && m.is_active_admin());
        if !is_admin {
            return Err(SyncError::SessionNotReady(format!(
                "engine account is not an admin of team '{}'",
                team.name
            )));
        }

        Ok(Session {
            team_id: team.team_id,
            own_account_id,
        })
    }

    fn create_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: INITIAL_BACKOFF,
            max_interval: MAX_BACKOFF,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Retries [`resolve`](Self::resolve) until it succeeds or shutdown.
    pub async fn run(mut self) {
        let mut backoff = Self::create_backoff();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.resolve().await {
                Ok(session) => {
                    info!(team_id = %session.team_id, attempt, "Remote session ready");
                    self.ready.set_ready(session);
                    return;
                }
                Err(e) => warn!(error = %e, attempt, "Remote session not ready"),
            }

            let delay = backoff.next_backoff().unwrap_or(MAX_BACKOFF);
            debug!(?delay, "Waiting before next session check");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during session bootstrap");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Member, MemberRole, TeamInfo};
    use crate::testing::{session, FakeRemote, ENGINE_ACCOUNT};

    #[tokio::test]
    async fn test_resolve_single_admin_team() {
        let remote = Arc::new(FakeRemote::default());
        let (bootstrap, _handle) = SessionBootstrap::new(remote, ReadyGate::new());

        assert_eq!(bootstrap.resolve().await.unwrap(), session());
    }

    #[tokio::test]
    async fn test_resolve_requires_exactly_one_team() {
        let remote = Arc::new(FakeRemote::default());
        remote.with(|s| {
            s.teams.push(TeamInfo {
                team_id: "team-2".into(),
                name: "Other".into(),
            })
        });
        let (bootstrap, _handle) = SessionBootstrap::new(remote, ReadyGate::new());

        let err = bootstrap.resolve().await.unwrap_err();
        assert!(matches!(err, SyncError::SessionNotReady(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_resolve_requires_admin() {
        let remote = Arc::new(FakeRemote::default());
        remote.with(|s| s.team_members = vec![Member::active(ENGINE_ACCOUNT, MemberRole::Member)]);
        let (bootstrap, _handle) = SessionBootstrap::new(remote, ReadyGate::new());

        assert!(bootstrap.resolve().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_until_ready() {
        let remote = Arc::new(FakeRemote::default());
        remote.with(|s| s.teams.clear());
        let gate = ReadyGate::new();
        let (bootstrap, _handle) = SessionBootstrap::new(remote.clone(), gate.clone());
        let task = tokio::spawn(bootstrap.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!gate.is_ready());

        remote.with(|s| {
            s.teams.push(TeamInfo {
                team_id: "team-1".into(),
                name: "Staff".into(),
            })
        });

        tokio::time::timeout(Duration::from_secs(120), gate.wait_ready())
            .await
            .unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let remote = Arc::new(FakeRemote::default());
        remote.with(|s| s.teams.clear());
        let (bootstrap, handle) = SessionBootstrap::new(remote, ReadyGate::new());
        let task = tokio::spawn(bootstrap.run());

        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
