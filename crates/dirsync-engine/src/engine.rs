//! # Engine
//!
//! Main orchestrator. Wires the collaborators together and owns the
//! background tasks.
//!
//! ## Engine Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                            Engine                                │  │
//! │  │                                                                  │  │
//! │  │  • Spawns session bootstrap, scheduler and event loop            │  │
//! │  │  • Feeds sync.interval_minutes changes to the scheduler          │  │
//! │  │  • Exposes trigger_sync() and status()                           │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │SessionBootstrap│  │ SyncScheduler  │  │ EventLoop              │    │
//! │  │                │  │                │  │                        │    │
//! │  │ opens the      │  │ SyncDriver     │  │ BindRequestHandler     │    │
//! │  │ ReadyGate      │  │ cycles         │  │ ChannelAdminHandler    │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  SHUTDOWN ORDER:                                                       │
//! │  stop signals ─► await tasks ─► drain bind workers ─► wait for cycle   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use dirsync_db::{AccountRepository, Database, DbConfig};

use crate::bind::{BindProcessor, BindRequestHandler};
use crate::config::{ConfigKey, ConfigStore};
use crate::directory::{DirectoryReader, LdapDirectory};
use crate::driver::{SyncDriver, SyncStatus};
use crate::error::{SyncError, SyncResult};
use crate::events::{ChannelAdminHandler, EventDispatcher, EventLoop, EventLoopHandle};
use crate::gate::ReadyGate;
use crate::remote::RemoteAccountService;
use crate::scheduler::{SyncScheduler, SyncSchedulerHandle};
use crate::session::{SessionBootstrap, SessionBootstrapHandle};

// =============================================================================
// Engine
// =============================================================================

/// Handles of the running background tasks.
struct Running {
    bootstrap: SessionBootstrapHandle,
    scheduler: SyncSchedulerHandle,
    events: EventLoopHandle,
    tasks: Vec<JoinHandle<()>>,
}

/// The directory sync engine.
pub struct Engine {
    config: Arc<ConfigStore>,
    db: Database,
    remote: Arc<dyn RemoteAccountService>,
    ready: ReadyGate,
    driver: Arc<SyncDriver>,
    bind: Arc<BindRequestHandler>,
    running: Option<Running>,
}

impl Engine {
    fn new(
        config: Arc<ConfigStore>,
        db: Database,
        directory: Arc<dyn DirectoryReader>,
        remote: Arc<dyn RemoteAccountService>,
    ) -> Self {
        let ready = ReadyGate::new();

        let driver = Arc::new(SyncDriver::new(
            config.clone(),
            directory.clone(),
            remote.clone(),
            db.accounts(),
            ready.clone(),
        ));

        let bind = Arc::new(BindRequestHandler::new(BindProcessor::new(
            db.accounts(),
            directory,
            remote.clone(),
            ready.clone(),
        )));

        Engine {
            config,
            db,
            remote,
            ready,
            driver,
            bind,
            running: None,
        }
    }

    /// Starts the background tasks.
    pub fn start(&mut self) -> SyncResult<()> {
        if self.running.is_some() {
            return Err(SyncError::Internal("engine already started".into()));
        }

        let interval = self.config.snapshot()?.sync.interval_minutes;
        let (interval_tx, interval_rx) = watch::channel(interval);
        self.config
            .observe(ConfigKey::SyncIntervalMinutes, move |config| {
                interval_tx.send_replace(config.sync.interval_minutes);
            })?;

        let (bootstrap, bootstrap_handle) =
            SessionBootstrap::new(self.remote.clone(), self.ready.clone());
        let (scheduler, scheduler_handle) = SyncScheduler::new(self.driver.clone(), interval_rx);

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(self.bind.clone());
        dispatcher.register(Arc::new(ChannelAdminHandler::new(
            self.db.accounts(),
            self.remote.clone(),
            self.ready.clone(),
        )));
        let (event_loop, events_handle) = EventLoop::new(
            self.remote.clone(),
            self.config.clone(),
            self.ready.clone(),
            Arc::new(dispatcher),
        );

        let tasks = vec![
            tokio::spawn(bootstrap.run()),
            tokio::spawn(scheduler.run()),
            tokio::spawn(event_loop.run()),
        ];

        self.running = Some(Running {
            bootstrap: bootstrap_handle,
            scheduler: scheduler_handle,
            events: events_handle,
            tasks,
        });

        info!(interval_minutes = interval, "Engine started");
        Ok(())
    }

    /// Requests a sync cycle. Returns false if one is already queued.
    pub fn trigger_sync(&self) -> bool {
        self.driver.trigger()
    }

    pub async fn status(&self) -> SyncStatus {
        self.driver.status().await
    }

    pub fn ready(&self) -> &ReadyGate {
        &self.ready
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn driver(&self) -> &Arc<SyncDriver> {
        &self.driver
    }

    pub fn accounts(&self) -> AccountRepository {
        self.db.accounts()
    }

    /// Stops the background tasks and waits for in-flight work.
    pub async fn shutdown(&mut self) -> SyncResult<()> {
        info!("Shutting down engine");

        if let Some(running) = self.running.take() {
            running.bootstrap.shutdown().await;
            if let Err(e) = running.scheduler.shutdown().await {
                warn!(error = %e, "Scheduler shutdown signal not delivered");
            }
            if let Err(e) = running.events.shutdown().await {
                warn!(error = %e, "Event loop shutdown signal not delivered");
            }

            for task in running.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Engine task ended abnormally");
                }
            }
        }

        self.bind.drain().await;
        self.driver.wait_idle().await;
        self.db.close().await;

        info!("Engine stopped");
        Ok(())
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    config: Arc<ConfigStore>,
    db: Option<Database>,
    directory: Option<Arc<dyn DirectoryReader>>,
    remote: Option<Arc<dyn RemoteAccountService>>,
}

impl EngineBuilder {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        EngineBuilder {
            config,
            db: None,
            directory: None,
            remote: None,
        }
    }

    /// Sets the database. Defaults to the configured SQLite file.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the directory reader. Defaults to [`LdapDirectory`].
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryReader>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sets the remote account service (required).
    pub fn with_remote(mut self, remote: Arc<dyn RemoteAccountService>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub async fn build(self) -> SyncResult<Engine> {
        let remote = self
            .remote
            .ok_or_else(|| SyncError::InvalidConfig("Remote account service required".into()))?;

        let db = match self.db {
            Some(db) => db,
            None => {
                let path = self.config.snapshot()?.database_path().ok_or_else(|| {
                    SyncError::InvalidConfig("No database path and no data directory".into())
                })?;
                Database::new(DbConfig::new(path)).await?
            }
        };

        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(LdapDirectory::new(self.config.clone())));

        Ok(Engine::new(self.config, db, directory, remote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{BindRequest, RemoteEvent};
    use crate::testing::{Fixture, RemoteCall};
    use dirsync_core::{DirectoryEntry, LockState};
    use std::time::Duration;

    async fn engine(fx: &Fixture) -> Engine {
        EngineBuilder::new(fx.config.clone())
            .with_database(fx.db.clone())
            .with_directory(fx.directory.clone())
            .with_remote(fx.remote.clone())
            .build()
            .await
            .unwrap()
    }

    async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
    }

    #[tokio::test]
    async fn test_builder_requires_remote() {
        let fx = Fixture::new().await;
        let result = EngineBuilder::new(fx.config.clone())
            .with_database(fx.db.clone())
            .build()
            .await;
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_engine_lifecycle() {
        let fx = Fixture::new().await;
        fx.directory
            .set_members(vec![
                DirectoryEntry::new("2", "alice@x.com", true),
                DirectoryEntry::new("3", "bob@x.com", true),
            ]);
        fx.directory.set_password("bob@x.com", "pw");
        fx.seed_directory_locked("3", "bob@x.com", true).await;
        fx.remote.with(|s| {
            s.taken.insert("bob@x.com".into());
        });

        let mut engine = engine(&fx).await;
        assert!(engine.start().is_ok());
        assert!(engine.start().is_err());

        engine.ready().wait_ready().await;
        assert!(engine.trigger_sync());
        let driver = engine.driver().clone();
        eventually("sync cycle", || {
            fx.remote
                .calls()
                .contains(&RemoteCall::Provision("alice@x.com".into()))
        })
        .await;
        driver.wait_idle().await;

        // Still listed, so the cycle leaves the claimed record alone
        let bob = fx.accounts.require("bob@x.com").await.unwrap();
        assert_eq!(bob.lock_state, LockState::DirectoryLocked);
        assert!(bob.enabled);

        fx.remote.push_event(RemoteEvent::BindRequest(BindRequest {
            username: "bob@x.com".into(),
            password: "pw".into(),
            secure_exchange_token: "tok".into(),
            level2_secret: Some("l2".into()),
        }));
        eventually("bind request", || {
            fx.remote
                .calls()
                .iter()
                .any(|c| matches!(c, RemoteCall::Link { .. }))
        })
        .await;

        engine.shutdown().await.unwrap();
        assert!(engine.status().await.last_run.is_some());
    }

    #[tokio::test]
    async fn test_interval_change_reaches_scheduler() {
        let fx = Fixture::new().await;
        let mut engine = engine(&fx).await;
        engine.start().unwrap();

        engine.config().set("sync.interval_minutes", "0").unwrap();
        assert_eq!(engine.config().get("sync.interval_minutes").unwrap(), "0");

        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_linked_state_after_bind() {
        let fx = Fixture::new().await;
        fx.directory.set_password("bob@x.com", "pw");
        fx.seed_directory_locked("3", "bob@x.com", true).await;

        let mut engine = engine(&fx).await;
        engine.start().unwrap();
        engine.ready().wait_ready().await;

        fx.remote.push_event(RemoteEvent::BindRequest(BindRequest {
            username: "bob@x.com".into(),
            password: "pw".into(),
            secure_exchange_token: "tok".into(),
            level2_secret: Some("l2".into()),
        }));
        eventually("link call", || {
            fx.remote
                .calls()
                .iter()
                .any(|c| matches!(c, RemoteCall::Link { .. }))
        })
        .await;

        // Draining bind workers completes the link before the pool closes
        let accounts = engine.accounts();
        engine.bind.drain().await;
        let bob = accounts.require("bob@x.com").await.unwrap();
        assert_eq!(bob.lock_state, LockState::Unlocked);

        engine.shutdown().await.unwrap();
    }
}
