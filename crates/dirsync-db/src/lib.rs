//! # dirsync-db: Account Store for Dirsync
//!
//! Database access for the directory sync engine. SQLite holds one row per
//! tracked identity; sqlx drives it asynchronously.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dirsync Data Flow                                │
//! │                                                                         │
//! │  SyncDriver / BindRequestHandler                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    dirsync-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repository   │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (account.rs,  │    │  (embedded)  │  │   │
//! │  │   │               │    │  delta.rs)    │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ AccountRepo   │    │ 001_accounts │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/dirsync.db                                         │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Account repository and delta computation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dirsync_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/dirsync.db")).await?;
//!
//! let outcome = db.accounts().compute_delta(&entries).await?;
//! for entry in &outcome.delta.setup {
//!     // provision...
//! }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::account::AccountRepository;
pub use repository::delta::DeltaOutcome;
