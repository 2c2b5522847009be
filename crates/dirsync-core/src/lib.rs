//! # dirsync-core: Pure Domain Logic for Dirsync
//!
//! This crate holds the data model of the directory sync engine and the
//! rules that decide what happens to an account. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Dirsync Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    dirsync-engine                               │   │
//! │  │    SyncDriver ──► ActionPipeline ──► BindRequestHandler        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ dirsync-core (THIS CRATE) ★                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   lock    │  │   delta   │  │ validation│  │   │
//! │  │   │  Entry    │  │ LockState │  │  Delta    │  │  email    │  │   │
//! │  │   │  Record   │  │ LockPlan  │  │ LockUpd.  │  │ exclusion │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    dirsync-db (Account Store)                   │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Directory entries, account records, lock states
//! - [`lock`] - Lock state machine
//! - [`delta`] - Work lists produced by the delta computation
//! - [`validation`] - Email and exclusion-list rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use dirsync_core::lock::plan_lock_update;
//! use dirsync_core::{LockState, LockType};
//!
//! // A disabled directory member with an active account gets locked
//! let plan = plan_lock_update(LockState::Unlocked, false);
//! assert_eq!(plan.remote_call, Some(LockType::FullLock));
//! assert_eq!(plan.next_state, LockState::FullyLocked);
//!
//! // A claimed account is never touched remotely
//! let plan = plan_lock_update(LockState::DirectoryLocked, false);
//! assert_eq!(plan.remote_call, None);
//! assert_eq!(plan.next_state, LockState::DirectoryLocked);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod delta;
pub mod error;
pub mod lock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use delta::{Delta, LockUpdate};
pub use error::{CoreError, CoreResult, ValidationError};
pub use types::*;
