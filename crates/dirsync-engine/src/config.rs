//! # Engine Configuration
//!
//! Configuration document and the live, hot-reloadable config store.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. ConfigStore::set at runtime (highest priority, persisted)          │
//! │     store.set("sync.interval_minutes", "15")                           │
//! │                                                                         │
//! │  2. Environment Variables                                              │
//! │     DIRSYNC_GROUP_DN=cn=staff,ou=groups,dc=x,dc=com                    │
//! │     DIRSYNC_SYNC_ENABLED=yes                                           │
//! │                                                                         │
//! │  3. TOML Config File                                                   │
//! │     ~/.config/dirsync/dirsync.toml (Linux)                             │
//! │                                                                         │
//! │  4. Default Values (lowest priority)                                   │
//! │     sync disabled, 60 minute interval                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [directory]
//! uri = "ldaps://dc1.x.com:636"
//! base_dn = "dc=x,dc=com"
//! bind_dn = "cn=dirsync,ou=service,dc=x,dc=com"
//! bind_password = "..."
//! group_dn = "cn=staff,ou=groups,dc=x,dc=com"
//! server_type = "active_directory"
//!
//! [sync]
//! enabled = true
//! interval_minutes = 60
//! excluded_accounts = ["svc-backup@x.com"]
//!
//! [database]
//! path = "/var/lib/dirsync/dirsync.db"
//! ```
//!
//! ## Hot Reload
//! ```text
//!   store.set("sync.interval_minutes", "15")
//!        │
//!        ▼  (config mutex held)
//!   parse ─► validate ─► save TOML ─► swap snapshot ─► observers(key)(&new)
//! ```
//! Observers run on the caller's thread while the mutex is held. They get
//! the new snapshot as an argument and must not call back into the store.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use dirsync_core::validation::ExclusionList;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Directory Settings
// =============================================================================

/// Flavour of directory server, which decides how enablement is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    /// Disabled when `userAccountControl` has the ACCOUNTDISABLE bit.
    #[default]
    ActiveDirectory,
    /// Disabled when `pwdAccountLockedTime` is present.
    OpenLdap,
}

impl std::fmt::Display for ServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerType::ActiveDirectory => write!(f, "active_directory"),
            ServerType::OpenLdap => write!(f, "open_ldap"),
        }
    }
}

impl std::str::FromStr for ServerType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active_directory" | "ad" => Ok(ServerType::ActiveDirectory),
            "open_ldap" | "openldap" => Ok(ServerType::OpenLdap),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown server type: '{}'. Valid options: active_directory, open_ldap",
                other
            ))),
        }
    }
}

/// Connection and schema settings for the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// `ldap://` or `ldaps://` URL of the directory server.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Search base for user lookups.
    #[serde(default)]
    pub base_dn: String,

    /// Service account used for listing and lookups.
    #[serde(default)]
    pub bind_dn: String,

    #[serde(default)]
    pub bind_password: String,

    /// Group (or container) whose members get accounts.
    #[serde(default)]
    pub group_dn: String,

    #[serde(default)]
    pub server_type: ServerType,

    /// Attribute on the group holding member DNs.
    #[serde(default = "default_member_attribute")]
    pub member_attribute: String,

    /// Attribute holding the login name / email.
    #[serde(default = "default_username_attribute")]
    pub username_attribute: String,

    /// Attribute holding the directory id.
    #[serde(default = "default_guid_attribute")]
    pub guid_attribute: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_uri() -> String {
    "ldap://localhost:389".to_string()
}
fn default_member_attribute() -> String {
    "member".to_string()
}
fn default_username_attribute() -> String {
    "mail".to_string()
}
fn default_guid_attribute() -> String {
    "objectGUID".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}

impl Default for DirectorySettings {
    fn default() -> Self {
        DirectorySettings {
            uri: default_uri(),
            base_dn: String::new(),
            bind_dn: String::new(),
            bind_password: String::new(),
            group_dn: String::new(),
            server_type: ServerType::default(),
            member_attribute: default_member_attribute(),
            username_attribute: default_username_attribute(),
            guid_attribute: default_guid_attribute(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DirectorySettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Master switch for sync cycles.
    #[serde(default)]
    pub enabled: bool,

    /// Minutes between scheduled cycles. 0 disables the scheduler.
    /// At most [`MAX_INTERVAL_MINUTES`].
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// Directory members the engine must never manage.
    #[serde(default)]
    pub excluded_accounts: Vec<String>,

    /// Wait per remote event poll (milliseconds).
    #[serde(default = "default_event_poll_millis")]
    pub event_poll_millis: u64,
}

/// Longest accepted sync interval: one year.
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

fn default_interval_minutes() -> u64 {
    60
}
fn default_event_poll_millis() -> u64 {
    50
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: false,
            interval_minutes: default_interval_minutes(),
            excluded_accounts: Vec::new(),
            event_poll_millis: default_event_poll_millis(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub directory: DirectorySettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub database: DatabaseSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (dirsync.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        debug!(?path, "Engine config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = url::Url::parse(&self.directory.uri)?;
        if url.scheme() != "ldap" && url.scheme() != "ldaps" {
            return Err(SyncError::InvalidUrl(format!(
                "Directory URL must start with ldap:// or ldaps://, got: {}",
                self.directory.uri
            )));
        }

        if self.sync.enabled && self.directory.group_dn.trim().is_empty() {
            return Err(SyncError::InvalidConfig(
                "directory.group_dn is required when sync is enabled".into(),
            ));
        }

        if self.sync.interval_minutes > MAX_INTERVAL_MINUTES {
            return Err(SyncError::InvalidConfig(format!(
                "sync.interval_minutes must be at most {}, got {}",
                MAX_INTERVAL_MINUTES, self.sync.interval_minutes
            )));
        }

        if self.sync.event_poll_millis == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.event_poll_millis must be greater than 0".into(),
            ));
        }

        if self.directory.connect_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "directory.connect_timeout_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(uri) = std::env::var("DIRSYNC_LDAP_URI") {
            debug!(uri = %uri, "Overriding directory URI from environment");
            self.directory.uri = uri;
        }

        if let Ok(dn) = std::env::var("DIRSYNC_BIND_DN") {
            self.directory.bind_dn = dn;
        }

        if let Ok(pw) = std::env::var("DIRSYNC_BIND_PASSWORD") {
            self.directory.bind_password = pw;
        }

        if let Ok(group) = std::env::var("DIRSYNC_GROUP_DN") {
            debug!(group = %group, "Overriding group DN from environment");
            self.directory.group_dn = group;
        }

        if let Ok(enabled) = std::env::var("DIRSYNC_SYNC_ENABLED") {
            match parse_flag(&enabled) {
                Ok(flag) => self.sync.enabled = flag,
                Err(_) => warn!(value = %enabled, "Unknown DIRSYNC_SYNC_ENABLED value"),
            }
        }

        if let Ok(minutes) = std::env::var("DIRSYNC_SYNC_INTERVAL_MINUTES") {
            if let Ok(m) = minutes.trim().parse::<u64>() {
                self.sync.interval_minutes = m;
            }
        }

        if let Ok(list) = std::env::var("DIRSYNC_EXCLUDED_ACCOUNTS") {
            self.sync.excluded_accounts = split_list(&list);
        }

        if let Ok(path) = std::env::var("DIRSYNC_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "dirsync", "dirsync")
            .map(|dirs| dirs.config_dir().join("dirsync.toml"))
    }

    /// Returns the configured database path, or the platform default.
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "dirsync", "dirsync")
                .map(|dirs| dirs.data_dir().join("dirsync.db"))
        })
    }

    /// Exclusion list built from `sync.excluded_accounts`.
    pub fn exclusion_list(&self) -> ExclusionList {
        ExclusionList::new(&self.sync.excluded_accounts)
    }

    pub fn event_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.event_poll_millis)
    }
}

/// Parses yes/no style flags.
pub fn parse_flag(value: &str) -> SyncResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "yes" | "on" | "true" | "1" => Ok(true),
        "no" | "off" | "false" | "0" => Ok(false),
        other => Err(SyncError::InvalidConfig(format!(
            "Expected yes/no, got '{}'",
            other
        ))),
    }
}

/// Splits `"a, b ,c"` into `["a", "b", "c"]`, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Config Keys
// =============================================================================

/// Keys accepted by [`ConfigStore::set`] and [`ConfigStore::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    DirectoryUri,
    DirectoryBaseDn,
    DirectoryBindDn,
    DirectoryBindPassword,
    DirectoryGroupDn,
    DirectoryServerType,
    SyncEnabled,
    SyncIntervalMinutes,
    SyncExcludedAccounts,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 9] = [
        ConfigKey::DirectoryUri,
        ConfigKey::DirectoryBaseDn,
        ConfigKey::DirectoryBindDn,
        ConfigKey::DirectoryBindPassword,
        ConfigKey::DirectoryGroupDn,
        ConfigKey::DirectoryServerType,
        ConfigKey::SyncEnabled,
        ConfigKey::SyncIntervalMinutes,
        ConfigKey::SyncExcludedAccounts,
    ];

    /// Dotted name, matching the TOML layout.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::DirectoryUri => "directory.uri",
            ConfigKey::DirectoryBaseDn => "directory.base_dn",
            ConfigKey::DirectoryBindDn => "directory.bind_dn",
            ConfigKey::DirectoryBindPassword => "directory.bind_password",
            ConfigKey::DirectoryGroupDn => "directory.group_dn",
            ConfigKey::DirectoryServerType => "directory.server_type",
            ConfigKey::SyncEnabled => "sync.enabled",
            ConfigKey::SyncIntervalMinutes => "sync.interval_minutes",
            ConfigKey::SyncExcludedAccounts => "sync.excluded_accounts",
        }
    }

    /// Writes `value` into `config`.
    fn apply(&self, config: &mut EngineConfig, value: &str) -> SyncResult<()> {
        let dir = &mut config.directory;
        match self {
            ConfigKey::DirectoryUri => dir.uri = value.trim().to_string(),
            ConfigKey::DirectoryBaseDn => dir.base_dn = value.trim().to_string(),
            ConfigKey::DirectoryBindDn => dir.bind_dn = value.trim().to_string(),
            ConfigKey::DirectoryBindPassword => dir.bind_password = value.to_string(),
            ConfigKey::DirectoryGroupDn => dir.group_dn = value.trim().to_string(),
            ConfigKey::DirectoryServerType => dir.server_type = value.parse()?,
            ConfigKey::SyncEnabled => config.sync.enabled = parse_flag(value)?,
            ConfigKey::SyncIntervalMinutes => {
                config.sync.interval_minutes = value.trim().parse().map_err(|_| {
                    SyncError::InvalidConfig(format!(
                        "sync.interval_minutes must be a whole number of minutes, got '{}'",
                        value
                    ))
                })?
            }
            ConfigKey::SyncExcludedAccounts => config.sync.excluded_accounts = split_list(value),
        }
        Ok(())
    }

    /// Renders the current value. Secrets are masked.
    fn render(&self, config: &EngineConfig) -> String {
        let dir = &config.directory;
        match self {
            ConfigKey::DirectoryUri => dir.uri.clone(),
            ConfigKey::DirectoryBaseDn => dir.base_dn.clone(),
            ConfigKey::DirectoryBindDn => dir.bind_dn.clone(),
            ConfigKey::DirectoryBindPassword if dir.bind_password.is_empty() => String::new(),
            ConfigKey::DirectoryBindPassword => "********".to_string(),
            ConfigKey::DirectoryGroupDn => dir.group_dn.clone(),
            ConfigKey::DirectoryServerType => dir.server_type.to_string(),
            ConfigKey::SyncEnabled => (if config.sync.enabled { "yes" } else { "no" }).to_string(),
            ConfigKey::SyncIntervalMinutes => config.sync.interval_minutes.to_string(),
            ConfigKey::SyncExcludedAccounts => config.sync.excluded_accounts.join(", "),
        }
    }
}

impl std::fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConfigKey {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        ConfigKey::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| SyncError::UnknownConfigKey(s.to_string()))
    }
}

// =============================================================================
// Config Store
// =============================================================================

type Observer = Box<dyn Fn(&EngineConfig) + Send + Sync>;

struct StoreInner {
    config: EngineConfig,
    observers: HashMap<ConfigKey, Vec<Observer>>,
}

/// Live configuration shared by every engine component.
pub struct ConfigStore {
    inner: Mutex<StoreInner>,
    /// File that `set` persists to. `None` keeps changes in memory.
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Creates a store around an already loaded config.
    pub fn new(config: EngineConfig, path: Option<PathBuf>) -> Self {
        ConfigStore {
            inner: Mutex::new(StoreInner {
                config,
                observers: HashMap::new(),
            }),
            path,
        }
    }

    /// Creates a store that never touches disk (tests, embedding).
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, None)
    }

    /// Loads config from `path` (or the default location) and persists
    /// runtime changes back to the same file.
    pub fn load(path: Option<PathBuf>) -> SyncResult<Self> {
        let path = path.or_else(EngineConfig::default_config_path);
        let config = EngineConfig::load(path.clone())?;
        Ok(Self::new(config, path))
    }

    fn lock(&self) -> SyncResult<MutexGuard<'_, StoreInner>> {
        self.inner
            .lock()
            .map_err(|_| SyncError::Internal("config lock poisoned".into()))
    }

    /// Returns a copy of the current configuration.
    pub fn snapshot(&self) -> SyncResult<EngineConfig> {
        Ok(self.lock()?.config.clone())
    }

    /// Returns the current value of `key` as text.
    pub fn get(&self, key: &str) -> SyncResult<String> {
        let key: ConfigKey = key.parse()?;
        Ok(key.render(&self.lock()?.config))
    }

    /// Updates `key`, persists the document, then runs the observers
    /// registered for `key`.
    ///
    /// The update is all-or-nothing: a parse, validation or save failure
    /// leaves the live config untouched and runs no observer.
    pub fn set(&self, key: &str, value: &str) -> SyncResult<()> {
        let key: ConfigKey = key.parse()?;
        let mut inner = self.lock()?;

        let mut next = inner.config.clone();
        key.apply(&mut next, value)?;
        next.validate()?;

        if let Some(path) = &self.path {
            next.save(path)?;
        }

        inner.config = next;
        info!(key = %key, value = %key.render(&inner.config), "Config updated");

        if let Some(observers) = inner.observers.get(&key) {
            for observer in observers {
                observer(&inner.config);
            }
        }

        Ok(())
    }

    /// Registers `observer` to run after every successful `set` of `key`.
    ///
    /// The observer runs under the config mutex and must not call back into
    /// this store.
    pub fn observe<F>(&self, key: ConfigKey, observer: F) -> SyncResult<()>
    where
        F: Fn(&EngineConfig) + Send + Sync + 'static,
    {
        self.lock()?
            .observers
            .entry(key)
            .or_default()
            .push(Box::new(observer));
        Ok(())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn enabled_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.directory.group_dn = "cn=staff,ou=groups,dc=x,dc=com".into();
        config.sync.enabled = true;
        config
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(!config.sync.enabled);
        assert_eq!(config.sync.interval_minutes, 60);
        assert_eq!(config.directory.member_attribute, "member");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = enabled_config();
        assert!(config.validate().is_ok());

        config.directory.uri = "http://dc1.x.com".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.directory.uri = "ldaps://dc1.x.com:636".into();
        config.directory.group_dn = " ".into();
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_interval_upper_bound() {
        let mut config = enabled_config();
        config.sync.interval_minutes = MAX_INTERVAL_MINUTES;
        assert!(config.validate().is_ok());

        config.sync.interval_minutes = MAX_INTERVAL_MINUTES + 1;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        let store = ConfigStore::in_memory(enabled_config());
        assert!(store.set("sync.interval_minutes", &u64::MAX.to_string()).is_err());
        assert_eq!(store.get("sync.interval_minutes").unwrap(), "60");
    }

    #[test]
    fn test_flag_and_list_parsing() {
        assert!(parse_flag("yes").unwrap());
        assert!(parse_flag(" ON ").unwrap());
        assert!(!parse_flag("no").unwrap());
        assert!(parse_flag("maybe").is_err());

        assert_eq!(
            split_list(" a@x.com ,b@x.com,, "),
            vec!["a@x.com".to_string(), "b@x.com".to_string()]
        );
    }

    #[test]
    fn test_config_key_parsing() {
        for key in ConfigKey::ALL {
            assert_eq!(key.as_str().parse::<ConfigKey>().unwrap(), key);
        }
        assert!(matches!(
            "sync.colour".parse::<ConfigKey>(),
            Err(SyncError::UnknownConfigKey(_))
        ));
    }

    #[test]
    fn test_toml_serialization() {
        let config = enabled_config();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[directory]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: EngineConfig = toml::from_str(
            r#"
            [sync]
            enabled = false
            excluded_accounts = ["svc@x.com"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.sync.interval_minutes, 60);
        assert!(parsed.exclusion_list().contains("SVC@x.com"));
        assert_eq!(parsed.directory.guid_attribute, "objectGUID");
    }

    #[test]
    fn test_store_set_and_get() {
        let store = ConfigStore::in_memory(enabled_config());

        store.set("sync.excluded_accounts", "a@x.com,  b@x.com").unwrap();
        assert_eq!(store.get("sync.excluded_accounts").unwrap(), "a@x.com, b@x.com");

        store.set("sync.enabled", "no").unwrap();
        assert_eq!(store.get("sync.enabled").unwrap(), "no");
        assert!(!store.snapshot().unwrap().sync.enabled);

        store.set("directory.bind_password", "s3cret").unwrap();
        assert_eq!(store.get("directory.bind_password").unwrap(), "********");
    }

    #[test]
    fn test_store_rejects_unknown_and_invalid() {
        let store = ConfigStore::in_memory(enabled_config());

        assert!(matches!(
            store.set("sync.colour", "blue"),
            Err(SyncError::UnknownConfigKey(_))
        ));
        assert!(store.set("sync.interval_minutes", "soon").is_err());
        // Validation failure leaves the live value alone
        assert!(store.set("directory.uri", "http://nope").is_err());
        assert_eq!(store.get("directory.uri").unwrap(), "ldap://localhost:389");
    }

    #[test]
    fn test_observers_run_for_their_key_only() {
        let store = ConfigStore::in_memory(enabled_config());
        let seen = Arc::new(AtomicU64::new(0));

        let seen_clone = Arc::clone(&seen);
        store
            .observe(ConfigKey::SyncIntervalMinutes, move |config| {
                seen_clone.store(config.sync.interval_minutes, Ordering::SeqCst);
            })
            .unwrap();

        store.set("sync.enabled", "yes").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        store.set("sync.interval_minutes", "15").unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 15);

        // Rejected writes do not notify
        store.set("sync.interval_minutes", "-3").unwrap_err();
        assert_eq!(seen.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_store_persists_to_file() {
        let path = std::env::temp_dir()
            .join(format!("dirsync-{}", uuid::Uuid::new_v4()))
            .join("dirsync.toml");
        let store = ConfigStore::new(enabled_config(), Some(path.clone()));

        store.set("sync.interval_minutes", "5").unwrap();

        let reloaded = EngineConfig::load(Some(path.clone())).unwrap();
        assert_eq!(reloaded.sync.interval_minutes, 5);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
