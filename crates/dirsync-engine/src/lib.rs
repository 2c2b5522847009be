//! # dirsync-engine: Directory Sync Engine
//!
//! Keeps the accounts of a remote messaging service in step with the
//! members of one directory group. Enabled members get an account, disabled
//! or removed members are locked out, and users can claim a pre-existing
//! account by proving their directory password.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Engine Architecture                            │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      Engine (Main Orchestrator)                  │  │
//! │  │                                                                  │  │
//! │  │  Owns the background tasks, exposes trigger_sync() / status()    │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │ SyncScheduler  │  │  SyncDriver    │  │  EventLoop             │    │
//! │  │                │  │                │  │                        │    │
//! │  │ interval from  │─►│ directory ─►   │  │ bind requests ─►       │    │
//! │  │ ConfigStore    │  │ delta ─►       │  │   BindRequestHandler   │    │
//! │  │ (hot reload)   │  │ actions ─►     │  │ channel admin changes  │    │
//! │  │                │  │ re-scan        │  │   ─► ChannelAdmin...   │    │
//! │  └────────────────┘  └────────────────┘  └────────────────────────┘    │
//! │                                                                         │
//! │  COLLABORATORS (traits):                                               │
//! │  • DirectoryReader        - LdapDirectory in production               │
//! │  • RemoteAccountService   - the messaging service                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Runtime
//! - [`engine`] - `Engine` orchestrator and `EngineBuilder`
//! - [`driver`] - Serialized sync cycles, trigger, status
//! - [`scheduler`] - Interval scheduler with hot-reloaded period
//! - [`session`] - Resolves the managed team, opens the ready gate
//! - [`gate`] - Shared readiness signal
//! - [`events`] - Remote event loop and dispatch
//!
//! ### Sync Logic
//! - [`action`] - Setup / RetrySetup / UpdateLock pipeline
//! - [`bind`] - Bind/link protocol handler
//! - [`membership`] - Team and prescribed channel enrollment
//!
//! ### Collaborators & Ambient
//! - [`directory`] - Directory reader trait and LDAP adapter
//! - [`remote`] - Remote account service trait and event types
//! - [`config`] - TOML config and live `ConfigStore`
//! - [`logging`] - Tracing subscriber setup
//! - [`error`] - Sync error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dirsync_engine::{ConfigStore, EngineBuilder};
//!
//! dirsync_engine::logging::init_logging(false)?;
//!
//! let config = Arc::new(ConfigStore::load(None)?);
//! let mut engine = EngineBuilder::new(config)
//!     .with_remote(remote_service)
//!     .build()
//!     .await?;
//! engine.start()?;
//!
//! engine.trigger_sync();
//! println!("Sync: {}", engine.status().await);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod action;
pub mod bind;
pub mod config;
pub mod directory;
pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod logging;
pub mod membership;
pub mod remote;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use action::{Action, ActionContext, ActionKind, PipelineReport};
pub use bind::{BindOutcome, BindProcessor, BindRequestHandler};
pub use config::{ConfigKey, ConfigStore, EngineConfig, ServerType};
pub use directory::{DirectoryReader, LdapDirectory};
pub use driver::{SkipReason, SyncDriver, SyncOutcome, SyncReport, SyncStatus};
pub use engine::{Engine, EngineBuilder};
pub use error::{SyncError, SyncResult};
pub use events::{EventDispatcher, EventHandler, EventLoop, EventLoopHandle};
pub use gate::{ReadyGate, Session};
pub use remote::{
    BindRequest, EventKind, Member, MemberRole, MembershipStatus, RemoteAccountService,
    RemoteError, RemoteEvent,
};
