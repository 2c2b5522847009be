//! # Repository Module
//!
//! Database repository implementations for the account store.
//!
//! ## Repository Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  db.accounts()                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  AccountRepository                                                     │
//! │  ├── account.rs  get / list / create / guarded updates                 │
//! │  └── delta.rs    compute_delta (snapshot → work lists)                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite `accounts` table                                               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarded Updates
//! Every state-changing UPDATE names the lock state it expects in its WHERE
//! clause and reports whether a row matched. A sync cycle and a bind worker
//! racing on the same record cannot both win; the loser sees `false` and
//! logs instead of overwriting the other transition.

pub mod account;
pub mod delta;
