//! In-process fakes for the directory and the remote service.
//!
//! Both fakes record every call so tests can assert on side effects.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dirsync_core::{AccountCredentials, DirectoryEntry, LockType};
use dirsync_db::{AccountRepository, Database, DbConfig};

use crate::action::ActionContext;
use crate::config::{ConfigStore, EngineConfig};
use crate::directory::DirectoryReader;
use crate::error::{SyncError, SyncResult};
use crate::gate::{ReadyGate, Session};
use crate::membership::MembershipManager;
use crate::remote::{
    ChannelInfo, Member, MemberRole, MembershipStatus, RemoteAccountService, RemoteError,
    RemoteEvent, RemoteResult, TeamInfo,
};

pub const ENGINE_ACCOUNT: &str = "acct-engine";
pub const TEAM: &str = "team-1";
/// Channel where the engine is admin.
pub const ADMIN_CHANNEL: &str = "c-general";
/// Channel where the engine is a plain member.
pub const PLAIN_CHANNEL: &str = "c-random";

pub fn account_id(email: &str) -> String {
    format!("acct-{}", email)
}

pub fn session() -> Session {
    Session {
        team_id: TEAM.into(),
        own_account_id: ENGINE_ACCOUNT.into(),
    }
}

// =============================================================================
// Fake Directory
// =============================================================================

#[derive(Default)]
pub struct FakeDirectoryState {
    pub members: Vec<DirectoryEntry>,
    pub passwords: HashMap<String, String>,
    pub unavailable: bool,
    pub list_calls: usize,
    pub auth_calls: Vec<String>,
    pub auth_delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeDirectory {
    pub state: Mutex<FakeDirectoryState>,
}

impl FakeDirectory {
    pub fn set_members(&self, members: Vec<DirectoryEntry>) {
        self.state.lock().unwrap().members = members;
    }

    pub fn set_password(&self, email: &str, password: &str) {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(email.into(), password.into());
    }

    pub fn auth_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().auth_calls.clone()
    }
}

#[async_trait]
impl DirectoryReader for FakeDirectory {
    async fn list_group_members(&self, _group_dn: &str) -> SyncResult<Vec<DirectoryEntry>> {
        let mut state = self.state.lock().unwrap();
        state.list_calls += 1;
        if state.unavailable {
            return Err(SyncError::DirectoryUnavailable("connection refused".into()));
        }
        Ok(state.members.clone())
    }

    async fn authenticate(&self, email: &str, password: &str) -> SyncResult<bool> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.auth_calls.push(email.to_string());
            state.auth_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(SyncError::DirectoryUnavailable("connection refused".into()));
        }
        Ok(state.passwords.get(email).map(String::as_str) == Some(password))
    }
}

// =============================================================================
// Fake Remote Service
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Provision(String),
    Lookup(String),
    SetLock(String, LockType),
    Link {
        email: String,
        token: String,
        level2: Option<String>,
    },
    BindResponse {
        email: String,
        token: String,
        level2: String,
    },
    AddToTeam(String),
    AddToChannel(String, String),
}

pub struct FakeRemoteState {
    pub calls: Vec<RemoteCall>,
    /// Names owned by someone else: provisioning collides.
    pub taken: HashSet<String>,
    pub fail_provision: HashSet<String>,
    pub fail_lock: HashSet<String>,
    pub fail_link: bool,
    pub fail_channel: HashSet<String>,
    pub teams: Vec<TeamInfo>,
    pub team_members: Vec<Member>,
    pub channels: Vec<ChannelInfo>,
    pub channel_members: HashMap<String, Vec<Member>>,
    pub events: VecDeque<RemoteEvent>,
}

impl Default for FakeRemoteState {
    fn default() -> Self {
        let mut channel_members = HashMap::new();
        channel_members.insert(
            ADMIN_CHANNEL.to_string(),
            vec![Member::active(ENGINE_ACCOUNT, MemberRole::Admin)],
        );
        channel_members.insert(
            PLAIN_CHANNEL.to_string(),
            vec![Member::active(ENGINE_ACCOUNT, MemberRole::Member)],
        );

        FakeRemoteState {
            calls: Vec::new(),
            taken: HashSet::new(),
            fail_provision: HashSet::new(),
            fail_lock: HashSet::new(),
            fail_link: false,
            fail_channel: HashSet::new(),
            teams: vec![TeamInfo {
                team_id: TEAM.into(),
                name: "Staff".into(),
            }],
            team_members: vec![Member::active(ENGINE_ACCOUNT, MemberRole::Admin)],
            channels: vec![
                ChannelInfo {
                    channel_id: ADMIN_CHANNEL.into(),
                    name: "general".into(),
                },
                ChannelInfo {
                    channel_id: PLAIN_CHANNEL.into(),
                    name: "random".into(),
                },
            ],
            channel_members,
            events: VecDeque::new(),
        }
    }
}

#[derive(Default)]
pub struct FakeRemote {
    pub state: Mutex<FakeRemoteState>,
}

impl FakeRemote {
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeRemoteState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn lock_calls(&self) -> Vec<(String, LockType)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::SetLock(email, lock) => Some((email, lock)),
                _ => None,
            })
            .collect()
    }

    pub fn team_adds(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::AddToTeam(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn channel_adds(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                RemoteCall::AddToChannel(channel, id) => Some((channel, id)),
                _ => None,
            })
            .collect()
    }

    pub fn set_team_status(&self, account_id: &str, status: MembershipStatus) {
        self.with(|s| {
            s.team_members.retain(|m| m.account_id != account_id);
            s.team_members.push(Member {
                account_id: account_id.into(),
                role: MemberRole::Member,
                status,
            });
        });
    }

    pub fn push_event(&self, event: RemoteEvent) {
        self.with(|s| s.events.push_back(event));
    }
}

#[async_trait]
impl RemoteAccountService for FakeRemote {
    async fn own_account_id(&self) -> RemoteResult<String> {
        Ok(ENGINE_ACCOUNT.into())
    }

    async fn teams(&self) -> RemoteResult<Vec<TeamInfo>> {
        Ok(self.with(|s| s.teams.clone()))
    }

    async fn provision(&self, email: &str) -> RemoteResult<AccountCredentials> {
        self.with(|s| {
            s.calls.push(RemoteCall::Provision(email.into()));
            if s.taken.contains(email) {
                return Err(RemoteError::Collision(email.into()));
            }
            if s.fail_provision.contains(email) {
                return Err(RemoteError::Transport("timeout".into()));
            }
            Ok(AccountCredentials {
                remote_account_id: account_id(email),
                credential_secret: format!("cred-{}", email),
                recovery_secret: format!("recovery-{}", email),
            })
        })
    }

    async fn lookup_account_id(&self, email: &str) -> RemoteResult<String> {
        self.with(|s| s.calls.push(RemoteCall::Lookup(email.into())));
        Ok(account_id(email))
    }

    async fn set_lock(&self, email: &str, lock: LockType) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::SetLock(email.into(), lock));
            if s.fail_lock.contains(email) {
                return Err(RemoteError::Transport("timeout".into()));
            }
            Ok(())
        })
    }

    async fn link_account(
        &self,
        email: &str,
        exchange_token: &str,
        level2_secret: Option<&str>,
    ) -> RemoteResult<String> {
        self.with(|s| {
            s.calls.push(RemoteCall::Link {
                email: email.into(),
                token: exchange_token.into(),
                level2: level2_secret.map(str::to_string),
            });
            if s.fail_link {
                return Err(RemoteError::Rejected("token expired".into()));
            }
            Ok(format!("linked-cred-{}", email))
        })
    }

    async fn bind_response(
        &self,
        email: &str,
        exchange_token: &str,
        level2_secret: &str,
    ) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::BindResponse {
                email: email.into(),
                token: exchange_token.into(),
                level2: level2_secret.into(),
            })
        });
        Ok(())
    }

    async fn team_members(&self, _team_id: &str) -> RemoteResult<Vec<Member>> {
        Ok(self.with(|s| s.team_members.clone()))
    }

    async fn channels(&self, _team_id: &str) -> RemoteResult<Vec<ChannelInfo>> {
        Ok(self.with(|s| s.channels.clone()))
    }

    async fn channel_members(&self, _team_id: &str, channel_id: &str) -> RemoteResult<Vec<Member>> {
        self.with(|s| {
            s.channel_members
                .get(channel_id)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(channel_id.into()))
        })
    }

    async fn add_to_team(&self, _team_id: &str, account_id: &str) -> RemoteResult<()> {
        self.with(|s| {
            s.calls.push(RemoteCall::AddToTeam(account_id.into()));
            s.team_members
                .push(Member::active(account_id, MemberRole::Member));
        });
        Ok(())
    }

    async fn add_to_channel(
        &self,
        _team_id: &str,
        channel_id: &str,
        account_id: &str,
    ) -> RemoteResult<()> {
        self.with(|s| {
            s.calls
                .push(RemoteCall::AddToChannel(channel_id.into(), account_id.into()));
            if s.fail_channel.contains(channel_id) {
                return Err(RemoteError::Transport("timeout".into()));
            }
            s.channel_members
                .entry(channel_id.into())
                .or_default()
                .push(Member::active(account_id, MemberRole::Member));
            Ok(())
        })
    }

    async fn next_event(&self, timeout: Duration) -> RemoteResult<Option<RemoteEvent>> {
        if let Some(event) = self.with(|s| s.events.pop_front()) {
            return Ok(Some(event));
        }
        tokio::time::sleep(timeout).await;
        Ok(None)
    }
}

// =============================================================================
// Fixture
// =============================================================================

/// A wired set of fakes over an in-memory database.
pub struct Fixture {
    pub db: Database,
    pub accounts: AccountRepository,
    pub directory: Arc<FakeDirectory>,
    pub remote: Arc<FakeRemote>,
    pub config: Arc<ConfigStore>,
    pub ready: ReadyGate,
}

impl Fixture {
    /// Fixture with sync enabled and the gate open.
    pub async fn new() -> Self {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let mut config = EngineConfig::default();
        config.directory.group_dn = "cn=staff,ou=groups,dc=x,dc=com".into();
        config.sync.enabled = true;

        let ready = ReadyGate::new();
        ready.set_ready(session());

        Fixture {
            accounts: db.accounts(),
            db,
            directory: Arc::new(FakeDirectory::default()),
            remote: Arc::new(FakeRemote::default()),
            config: Arc::new(ConfigStore::in_memory(config)),
            ready,
        }
    }

    pub fn membership(&self) -> MembershipManager {
        MembershipManager::new(self.remote.clone())
    }

    pub fn context(&self) -> ActionContext {
        ActionContext {
            accounts: self.accounts.clone(),
            remote: self.remote.clone(),
            membership: self.membership(),
            session: session(),
        }
    }

    /// Seeds an UNLOCKED record as if provisioned earlier.
    pub async fn seed_unlocked(&self, id: &str, email: &str) {
        let entry = DirectoryEntry::new(id, email, true);
        let creds = AccountCredentials {
            remote_account_id: account_id(email),
            credential_secret: format!("cred-{}", email),
            recovery_secret: format!("recovery-{}", email),
        };
        self.accounts
            .create_provisioned(&entry, &creds)
            .await
            .unwrap();
    }

    /// Seeds a DIRECTORY_LOCKED record.
    pub async fn seed_directory_locked(&self, id: &str, email: &str, enabled: bool) {
        let entry = DirectoryEntry::new(id, email, enabled);
        self.accounts.create_directory_locked(&entry).await.unwrap();
    }
}
