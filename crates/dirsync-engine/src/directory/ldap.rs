//! LDAP directory reader built on `ldap3`.
//!
//! Every call opens its own connection, binds with the service account and
//! unbinds when done. Settings are read from the [`ConfigStore`] at call
//! time, so edits to the directory section apply on the next cycle.
//!
//! ## Member Resolution
//! ```text
//!   group entry ──(member attr)──► [dn, dn, ...] ──Scope::Base──► person
//!        │
//!        └── no member values: treat group_dn as a container and list
//!            every (objectClass=person) beneath it
//! ```
//!
//! ## Enablement
//! - Active Directory: disabled when `userAccountControl` has bit 0x2.
//! - OpenLDAP: disabled when `pwdAccountLockedTime` is present.

use async_trait::async_trait;
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, ResultEntry, Scope, SearchEntry, SearchResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dirsync_core::DirectoryEntry;

use crate::config::{ConfigStore, DirectorySettings, ServerType};
use crate::directory::DirectoryReader;
use crate::error::{SyncError, SyncResult};

/// ACCOUNTDISABLE flag of `userAccountControl`.
const UAC_ACCOUNT_DISABLE: u32 = 0x2;

/// LDAP result code for invalid credentials.
const RC_INVALID_CREDENTIALS: u32 = 49;

/// LDAP result code for a DN that does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

const PERSON_FILTER: &str = "(objectClass=person)";

// =============================================================================
// LDAP Directory
// =============================================================================

/// [`DirectoryReader`] backed by an LDAP server.
pub struct LdapDirectory {
    config: Arc<ConfigStore>,
}

impl LdapDirectory {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        LdapDirectory { config }
    }

    fn settings(&self) -> SyncResult<DirectorySettings> {
        Ok(self.config.snapshot()?.directory)
    }

    /// Opens a connection and spawns its driver.
    async fn open(settings: &DirectorySettings) -> SyncResult<Ldap> {
        let conn_settings = LdapConnSettings::new().set_conn_timeout(settings.connect_timeout());

        let (conn, ldap) = LdapConnAsync::with_settings(conn_settings, &settings.uri)
            .await
            .map_err(|e| {
                SyncError::DirectoryUnavailable(format!(
                    "Failed to connect to {}: {}",
                    settings.uri, e
                ))
            })?;

        tokio::spawn(async move {
            if let Err(e) = conn.drive().await {
                warn!(error = %e, "LDAP connection driver error");
            }
        });

        Ok(ldap)
    }

    /// Opens a connection bound as the service account.
    async fn connect(settings: &DirectorySettings) -> SyncResult<Ldap> {
        let mut ldap = Self::open(settings).await?;

        debug!(bind_dn = %settings.bind_dn, "Binding to directory");
        let result = ldap
            .simple_bind(&settings.bind_dn, &settings.bind_password)
            .await
            .map_err(|e| SyncError::DirectoryUnavailable(format!("Bind failed: {}", e)))?;

        if result.rc != 0 {
            return Err(SyncError::DirectoryUnavailable(format!(
                "Bind as {} failed with code {}: {}",
                settings.bind_dn, result.rc, result.text
            )));
        }

        Ok(ldap)
    }

    fn attributes(settings: &DirectorySettings) -> Vec<String> {
        vec![
            settings.username_attribute.clone(),
            settings.guid_attribute.clone(),
            "userAccountControl".to_string(),
            "pwdAccountLockedTime".to_string(),
        ]
    }

    async fn read_members(
        ldap: &mut Ldap,
        settings: &DirectorySettings,
        group_dn: &str,
    ) -> SyncResult<Vec<DirectoryEntry>> {
        let (groups, _res) = ldap
            .search(
                group_dn,
                Scope::Base,
                "(objectClass=*)",
                vec![settings.member_attribute.as_str()],
            )
            .await?
            .success()?;

        let group = groups
            .into_iter()
            .next()
            .map(SearchEntry::construct)
            .ok_or_else(|| SyncError::DirectoryQuery(format!("Group not found: {}", group_dn)))?;

        let member_dns = attr_values(&group, &settings.member_attribute);
        let attrs = Self::attributes(settings);

        if member_dns.is_empty() {
            debug!(group_dn = %group_dn, "Group has no member values, listing as container");
            let (entries, _res) = ldap
                .search(group_dn, Scope::Subtree, PERSON_FILTER, attrs)
                .await?
                .success()?;

            return Ok(entries
                .into_iter()
                .map(SearchEntry::construct)
                .filter_map(|e| to_directory_entry(settings, &e))
                .collect());
        }

        let mut members = Vec::with_capacity(member_dns.len());
        for dn in member_dns {
            let result = ldap
                .search(&dn, Scope::Base, PERSON_FILTER, attrs.clone())
                .await?;
            let Some(entries) = member_entries(&dn, result)? else {
                continue;
            };

            match entries.into_iter().next().map(SearchEntry::construct) {
                Some(entry) => members.extend(to_directory_entry(settings, &entry)),
                None => debug!(dn = %dn, "Group member is not a person, skipping"),
            }
        }

        Ok(members)
    }
}

/// Unwraps a base-scope member lookup. A member DN that no longer exists
/// is skipped so one stale group value does not fail the listing.
fn member_entries(dn: &str, result: SearchResult) -> SyncResult<Option<Vec<ResultEntry>>> {
    if result.1.rc == RC_NO_SUCH_OBJECT {
        warn!(dn = %dn, "Group member entry does not exist, skipping");
        return Ok(None);
    }
    let (entries, _res) = result.success()?;
    Ok(Some(entries))
}

#[async_trait]
impl DirectoryReader for LdapDirectory {
    async fn list_group_members(&self, group_dn: &str) -> SyncResult<Vec<DirectoryEntry>> {
        let settings = self.settings()?;
        let mut ldap = Self::connect(&settings).await?;

        let result = Self::read_members(&mut ldap, &settings, group_dn).await;

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, "Error during LDAP unbind");
        }

        let members = result?;
        info!(group_dn = %group_dn, count = members.len(), "Listed directory group");
        Ok(members)
    }

    async fn authenticate(&self, email: &str, password: &str) -> SyncResult<bool> {
        // An empty password would be an unauthenticated bind, which succeeds
        if password.is_empty() {
            return Ok(false);
        }

        let settings = self.settings()?;
        let mut ldap = Self::connect(&settings).await?;

        let filter = format!(
            "(&{}({}={}))",
            PERSON_FILTER,
            settings.username_attribute,
            escape_filter_value(email)
        );
        let search = ldap
            .search(&settings.base_dn, Scope::Subtree, &filter, vec!["dn"])
            .await
            .and_then(|r| r.success());

        if let Err(e) = ldap.unbind().await {
            warn!(error = %e, "Error during LDAP unbind");
        }

        let (entries, _res) = search?;
        let user_dn = match entries.into_iter().next() {
            Some(entry) => SearchEntry::construct(entry).dn,
            None => {
                debug!(email = %email, "No directory user for login");
                return Ok(false);
            }
        };

        let mut user_conn = Self::open(&settings).await?;
        let result = user_conn
            .simple_bind(&user_dn, password)
            .await
            .map_err(|e| SyncError::DirectoryUnavailable(format!("Bind failed: {}", e)))?;
        let _ = user_conn.unbind().await;

        match result.rc {
            0 => Ok(true),
            RC_INVALID_CREDENTIALS => Ok(false),
            rc => Err(SyncError::DirectoryQuery(format!(
                "User bind failed with code {}: {}",
                rc, result.text
            ))),
        }
    }
}

// =============================================================================
// Entry Mapping
// =============================================================================

/// Case-insensitive attribute lookup.
fn attr_values(entry: &SearchEntry, name: &str) -> Vec<String> {
    entry
        .attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
        .unwrap_or_default()
}

fn bin_attr_value<'a>(entry: &'a SearchEntry, name: &str) -> Option<&'a [u8]> {
    entry
        .bin_attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .and_then(|(_, v)| v.first())
        .map(Vec::as_slice)
}

/// Reads the directory id. AD `objectGUID` is 16 little-endian bytes.
fn directory_id(settings: &DirectorySettings, entry: &SearchEntry) -> Option<String> {
    if let Some(bytes) = bin_attr_value(entry, &settings.guid_attribute) {
        return Uuid::from_slice_le(bytes).ok().map(|u| u.to_string());
    }

    let value = attr_values(entry, &settings.guid_attribute).into_iter().next()?;
    if settings.server_type == ServerType::ActiveDirectory && value.len() == 16 {
        if let Ok(uuid) = Uuid::from_slice_le(value.as_bytes()) {
            return Some(uuid.to_string());
        }
    }
    Some(value.trim().to_string()).filter(|v| !v.is_empty())
}

fn is_enabled(settings: &DirectorySettings, entry: &SearchEntry) -> bool {
    match settings.server_type {
        ServerType::ActiveDirectory => attr_values(entry, "userAccountControl")
            .first()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .map(|flags| flags & UAC_ACCOUNT_DISABLE == 0)
            .unwrap_or(true),
        ServerType::OpenLdap => attr_values(entry, "pwdAccountLockedTime").is_empty(),
    }
}

/// Maps a person entry. Entries without an email or id are skipped.
fn to_directory_entry(settings: &DirectorySettings, entry: &SearchEntry) -> Option<DirectoryEntry> {
    let email = attr_values(entry, &settings.username_attribute)
        .into_iter()
        .next()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let Some(email) = email else {
        warn!(dn = %entry.dn, attribute = %settings.username_attribute, "Directory entry has no login, skipping");
        return None;
    };

    let Some(id) = directory_id(settings, entry) else {
        warn!(dn = %entry.dn, attribute = %settings.guid_attribute, "Directory entry has no id, skipping");
        return None;
    };

    Some(DirectoryEntry::new(id, email, is_enabled(settings, entry)))
}

/// Escapes a filter value (RFC 4515).
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', "\\5c")
        .replace('*', "\\2a")
        .replace('(', "\\28")
        .replace(')', "\\29")
        .replace('\0', "\\00")
}
