//! # Remote Account Service
//!
//! The seam between the engine and the messaging service that owns the
//! accounts. Everything the engine asks of the service goes through
//! [`RemoteAccountService`], so the pipeline, bind handling and membership
//! steps can be driven by an in-process fake in tests.
//!
//! ## Calls Made Per Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Setup / RetrySetup     provision(email) ─► lookup_account_id(email)   │
//! │                         set_lock(email, DirectoryLock) on collision    │
//! │                                                                         │
//! │  UpdateLock             set_lock(email, Unlock | FullLock)             │
//! │                                                                         │
//! │  Bind (link)            link_account(..) ─► lookup_account_id(email)   │
//! │  Bind (device)          bind_response(..)                              │
//! │                                                                         │
//! │  Membership             team_members / channels / channel_members      │
//! │                         add_to_team / add_to_channel                   │
//! │                                                                         │
//! │  Event loop             next_event(timeout)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Events
//! Events arrive as a kind string plus a JSON payload and are decoded with
//! [`RemoteEvent::decode`]. Kinds the engine does not act on decode to
//! [`RemoteEvent::Other`] instead of failing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use dirsync_core::{AccountCredentials, LockType};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Remote Errors
// =============================================================================

/// Failures reported by the remote account service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The username is already taken by an account the engine does not own.
    #[error("Username already taken: {0}")]
    Collision(String),

    /// No such account, team or channel.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The account was banned from the target.
    #[error("Banned: {0}")]
    Banned(String),

    /// Network failure or timeout.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The service refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    /// Returns true if repeating the call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

/// Result type alias for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

// =============================================================================
// Membership Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    /// Owners and admins.
    pub fn is_admin(&self) -> bool {
        matches!(self, MemberRole::Owner | MemberRole::Admin)
    }
}

/// Membership history of an account in a team or channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    /// Removed by an admin. Never re-added.
    Departed,
    /// Banned from the team or channel. Never re-added.
    Banned,
}

/// A team or channel member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub account_id: String,
    pub role: MemberRole,
    pub status: MembershipStatus,
}

impl Member {
    pub fn active(account_id: impl Into<String>, role: MemberRole) -> Self {
        Member {
            account_id: account_id.into(),
            role,
            status: MembershipStatus::Active,
        }
    }

    /// Active owner or admin.
    pub fn is_active_admin(&self) -> bool {
        self.status == MembershipStatus::Active && self.role.is_admin()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamInfo {
    pub team_id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub name: String,
}

// =============================================================================
// Service Trait
// =============================================================================

/// Operations the engine needs from the remote account service.
#[async_trait]
pub trait RemoteAccountService: Send + Sync {
    /// Account id the engine itself runs as.
    async fn own_account_id(&self) -> RemoteResult<String>;

    /// Teams the engine's own account belongs to.
    async fn teams(&self) -> RemoteResult<Vec<TeamInfo>>;

    /// Creates an account for `email`.
    ///
    /// Fails with [`RemoteError::Collision`] when the name is taken.
    async fn provision(&self, email: &str) -> RemoteResult<AccountCredentials>;

    /// Resolves the remote account id for `email`.
    async fn lookup_account_id(&self, email: &str) -> RemoteResult<String>;

    /// Applies a lock to the account named `email`.
    async fn set_lock(&self, email: &str, lock: LockType) -> RemoteResult<()>;

    /// Takes over an existing account after the user proved ownership.
    /// Returns the new credential secret.
    async fn link_account(
        &self,
        email: &str,
        exchange_token: &str,
        level2_secret: Option<&str>,
    ) -> RemoteResult<String>;

    /// Approves a bind request from a new device.
    async fn bind_response(
        &self,
        email: &str,
        exchange_token: &str,
        level2_secret: &str,
    ) -> RemoteResult<()>;

    async fn team_members(&self, team_id: &str) -> RemoteResult<Vec<Member>>;

    async fn channels(&self, team_id: &str) -> RemoteResult<Vec<ChannelInfo>>;

    async fn channel_members(&self, team_id: &str, channel_id: &str)
        -> RemoteResult<Vec<Member>>;

    async fn add_to_team(&self, team_id: &str, account_id: &str) -> RemoteResult<()>;

    async fn add_to_channel(
        &self,
        team_id: &str,
        channel_id: &str,
        account_id: &str,
    ) -> RemoteResult<()>;

    /// Waits up to `timeout` for the next event. `None` on timeout.
    async fn next_event(&self, timeout: Duration) -> RemoteResult<Option<RemoteEvent>>;
}

// =============================================================================
// Events
// =============================================================================

/// Event kind strings as sent by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BindRequest,
    ChannelMembers,
    Other,
}

impl EventKind {
    pub const BIND_REQUEST: &'static str = "bind_request";
    pub const CHANNEL_MEMBERS: &'static str = "channel_members";

    pub fn from_wire(kind: &str) -> Self {
        match kind {
            Self::BIND_REQUEST => EventKind::BindRequest,
            Self::CHANNEL_MEMBERS => EventKind::ChannelMembers,
            _ => EventKind::Other,
        }
    }
}

/// Credentials sent by a user asking to bind or link their account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindRequest {
    pub username: String,
    pub password: String,
    pub secure_exchange_token: String,
    /// Present when the request comes from an additional device.
    #[serde(default)]
    pub level2_secret: Option<String>,
}

impl std::fmt::Debug for BindRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindRequest")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("has_level2_secret", &self.level2_secret.is_some())
            .finish()
    }
}

/// One membership change in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMemberChange {
    pub channel_id: String,
    pub account_id: String,
    pub role: MemberRole,
    pub status: MembershipStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelMembersPayload {
    team_id: String,
    #[serde(default)]
    changes: Vec<ChannelMemberChange>,
}

/// A decoded event from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    BindRequest(BindRequest),
    ChannelMembers {
        team_id: String,
        changes: Vec<ChannelMemberChange>,
    },
    /// A kind the engine ignores.
    Other { kind: String },
}

impl RemoteEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            RemoteEvent::BindRequest(_) => EventKind::BindRequest,
            RemoteEvent::ChannelMembers { .. } => EventKind::ChannelMembers,
            RemoteEvent::Other { .. } => EventKind::Other,
        }
    }

    /// Decodes an event from its wire kind and JSON payload.
    pub fn decode(kind: &str, payload: serde_json::Value) -> SyncResult<Self> {
        let invalid = |e: serde_json::Error| SyncError::InvalidEvent {
            kind: kind.to_string(),
            reason: e.to_string(),
        };

        match EventKind::from_wire(kind) {
            EventKind::BindRequest => {
                let request: BindRequest = serde_json::from_value(payload).map_err(invalid)?;
                if request.username.trim().is_empty() {
                    return Err(SyncError::InvalidEvent {
                        kind: kind.to_string(),
                        reason: "username is empty".into(),
                    });
                }
                Ok(RemoteEvent::BindRequest(request))
            }
            EventKind::ChannelMembers => {
                let payload: ChannelMembersPayload =
                    serde_json::from_value(payload).map_err(invalid)?;
                Ok(RemoteEvent::ChannelMembers {
                    team_id: payload.team_id,
                    changes: payload.changes,
                })
            }
            EventKind::Other => Ok(RemoteEvent::Other {
                kind: kind.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_bind_request() {
        let event = RemoteEvent::decode(
            "bind_request",
            json!({
                "username": "alice@x.com",
                "password": "pw",
                "secureExchangeToken": "tok",
                "level2Secret": "l2"
            }),
        )
        .unwrap();

        match event {
            RemoteEvent::BindRequest(req) => {
                assert_eq!(req.username, "alice@x.com");
                assert_eq!(req.secure_exchange_token, "tok");
                assert_eq!(req.level2_secret.as_deref(), Some("l2"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_bind_request_without_level2() {
        let event = RemoteEvent::decode(
            "bind_request",
            json!({"username": "a@x.com", "password": "pw", "secureExchangeToken": "t"}),
        )
        .unwrap();
        assert!(matches!(
            event,
            RemoteEvent::BindRequest(BindRequest { level2_secret: None, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        let err = RemoteEvent::decode("bind_request", json!({"username": "a@x.com"})).unwrap_err();
        assert!(matches!(err, SyncError::InvalidEvent { ref kind, .. } if kind == "bind_request"));

        let err = RemoteEvent::decode(
            "bind_request",
            json!({"username": " ", "password": "pw", "secureExchangeToken": "t"}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("username is empty"));
    }

    #[test]
    fn test_decode_channel_members() {
        let event = RemoteEvent::decode(
            "channel_members",
            json!({
                "teamId": "team-1",
                "changes": [{
                    "channelId": "c-1",
                    "accountId": "acct-engine",
                    "role": "admin",
                    "status": "active"
                }]
            }),
        )
        .unwrap();

        assert_eq!(event.kind(), EventKind::ChannelMembers);
        if let RemoteEvent::ChannelMembers { team_id, changes } = event {
            assert_eq!(team_id, "team-1");
            assert_eq!(changes[0].role, MemberRole::Admin);
            assert_eq!(changes[0].status, MembershipStatus::Active);
        }
    }

    #[test]
    fn test_unknown_kind_is_other() {
        let event = RemoteEvent::decode("typing", json!({})).unwrap();
        assert_eq!(event, RemoteEvent::Other { kind: "typing".into() });
    }

    #[test]
    fn test_bind_request_debug_redacts_password() {
        let req = BindRequest {
            username: "a@x.com".into(),
            password: "hunter2".into(),
            secure_exchange_token: "t".into(),
            level2_secret: None,
        };
        let rendered = format!("{:?}", req);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("a@x.com"));
    }

    #[test]
    fn test_member_roles() {
        assert!(Member::active("a", MemberRole::Owner).is_active_admin());
        assert!(!Member::active("a", MemberRole::Member).is_active_admin());
        let departed = Member {
            account_id: "a".into(),
            role: MemberRole::Admin,
            status: MembershipStatus::Departed,
        };
        assert!(!departed.is_active_admin());
        assert!(RemoteError::Transport("x".into()).is_transient());
        assert!(!RemoteError::Banned("x".into()).is_transient());
    }
}
