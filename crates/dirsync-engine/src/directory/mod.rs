//! # Directory Access
//!
//! The directory is the source of truth for who should have an account.
//! The engine reads it through [`DirectoryReader`]; [`LdapDirectory`] is the
//! production implementation.
//!
//! ```text
//!   SyncDriver ──── list_group_members(group_dn) ───► DirectoryReader
//!   BindRequestHandler ── authenticate(email, pw) ──►       │
//!                                                           ▼
//!                                                    LdapDirectory (ldap3)
//! ```

use async_trait::async_trait;

use dirsync_core::DirectoryEntry;

use crate::error::SyncResult;

pub mod ldap;

pub use ldap::LdapDirectory;

/// Read access to the directory.
#[async_trait]
pub trait DirectoryReader: Send + Sync {
    /// Lists the members of `group_dn` with their id, email and enablement.
    async fn list_group_members(&self, group_dn: &str) -> SyncResult<Vec<DirectoryEntry>>;

    /// Checks `password` for the user with login `email`.
    ///
    /// `Ok(false)` means the credentials were wrong. Errors mean the
    /// directory could not answer.
    async fn authenticate(&self, email: &str, password: &str) -> SyncResult<bool>;
}
