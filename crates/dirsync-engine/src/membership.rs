//! # Team and Channel Membership
//!
//! Adds managed accounts to the engine's team and to every prescribed
//! channel, without ever repeating an add.
//!
//! ## Enrollment Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  team status of account          team step        channel step         │
//! │  ─────────────────────────       ─────────────    ──────────────────   │
//! │  none                            add_to_team      run                  │
//! │  active                          skip             run                  │
//! │  departed (removed by an admin)  skip, notice     skip                 │
//! │  banned                          skip, notice     skip                 │
//! │                                                                         │
//! │  channel step: for each prescribed channel, add unless the account     │
//! │  appears in the channel's member history with any status               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A prescribed channel is one where the engine's own account is an active
//! admin or owner.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use dirsync_core::AccountRecord;

use crate::error::SyncResult;
use crate::gate::Session;
use crate::remote::{Member, MembershipStatus, RemoteAccountService};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of enrolling one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled {
        team_added: bool,
        channels_added: usize,
        channel_failures: usize,
    },
    /// Banned from the team. Nothing was added.
    Banned,
    /// Removed from the team earlier. Nothing was added.
    Departed,
}

/// Totals for a re-scan over many accounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub checked: usize,
    pub team_adds: usize,
    pub channel_adds: usize,
    pub skipped: usize,
    pub failed: usize,
}

// =============================================================================
// Roster
// =============================================================================

/// Member history of the team and the prescribed channels, loaded once and
/// kept current as accounts are added.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    team: HashMap<String, MembershipStatus>,
    channels: Vec<(String, HashSet<String>)>,
}

impl Roster {
    fn new(team_members: Vec<Member>) -> Self {
        Roster {
            team: team_members
                .into_iter()
                .map(|m| (m.account_id, m.status))
                .collect(),
            channels: Vec::new(),
        }
    }

    fn add_channel(&mut self, channel_id: String, members: Vec<Member>) {
        let ids = members.into_iter().map(|m| m.account_id).collect();
        self.channels.push((channel_id, ids));
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(|(id, _)| id.as_str())
    }
}

// =============================================================================
// Membership Manager
// =============================================================================

#[derive(Clone)]
pub struct MembershipManager {
    remote: Arc<dyn RemoteAccountService>,
}

impl MembershipManager {
    pub fn new(remote: Arc<dyn RemoteAccountService>) -> Self {
        MembershipManager { remote }
    }

    /// Lists the channels of the team where we are an active admin or owner,
    /// together with their member history.
    async fn prescribed_channels(&self, session: &Session) -> SyncResult<Vec<(String, Vec<Member>)>> {
        let mut prescribed = Vec::new();

        for channel in self.remote.channels(&session.team_id).await? {
            let members = self
                .remote
                .channel_members(&session.team_id, &channel.channel_id)
                .await?;

            let is_admin = members
                .iter()
                .any(|m| m.account_id == session.own_account_id && m.is_active_admin());
            if is_admin {
                prescribed.push((channel.channel_id, members));
            }
        }

        Ok(prescribed)
    }

    /// Loads the team and prescribed channel member history.
    pub async fn roster(&self, session: &Session) -> SyncResult<Roster> {
        let mut roster = Roster::new(self.remote.team_members(&session.team_id).await?);
        for (channel_id, members) in self.prescribed_channels(session).await? {
            roster.add_channel(channel_id, members);
        }
        debug!(channels = roster.channels.len(), "Loaded membership roster");
        Ok(roster)
    }

    /// Roster limited to one channel, used when a channel becomes prescribed.
    async fn channel_roster(&self, session: &Session, channel_id: &str) -> SyncResult<Roster> {
        let mut roster = Roster::new(self.remote.team_members(&session.team_id).await?);
        let members = self
            .remote
            .channel_members(&session.team_id, channel_id)
            .await?;
        roster.add_channel(channel_id.to_string(), members);
        Ok(roster)
    }

    /// Adds `account_id` to the team and the roster's channels.
    ///
    /// A failed team add is an error. A failed channel add is logged and
    /// counted, and the remaining channels are still tried.
    pub async fn enroll(
        &self,
        session: &Session,
        roster: &mut Roster,
        account_id: &str,
    ) -> SyncResult<EnrollOutcome> {
        let team_added = match roster.team.get(account_id) {
            Some(MembershipStatus::Banned) => {
                info!(account_id = %account_id, "Account is banned from the team, not re-adding");
                return Ok(EnrollOutcome::Banned);
            }
            Some(MembershipStatus::Departed) => {
                info!(account_id = %account_id, "Account was removed from the team, not re-adding");
                return Ok(EnrollOutcome::Departed);
            }
            Some(MembershipStatus::Active) => false,
            None => {
                self.remote
                    .add_to_team(&session.team_id, account_id)
                    .await?;
                roster
                    .team
                    .insert(account_id.to_string(), MembershipStatus::Active);
                info!(account_id = %account_id, team_id = %session.team_id, "Added account to team");
                true
            }
        };

        let mut channels_added = 0;
        let mut channel_failures = 0;

        for (channel_id, members) in roster.channels.iter_mut() {
            if members.contains(account_id) {
                continue;
            }

            match self
                .remote
                .add_to_channel(&session.team_id, channel_id, account_id)
                .await
            {
                Ok(()) => {
                    members.insert(account_id.to_string());
                    channels_added += 1;
                    debug!(account_id = %account_id, channel_id = %channel_id, "Added account to channel");
                }
                Err(e) => {
                    channel_failures += 1;
                    warn!(account_id = %account_id, channel_id = %channel_id, error = %e, "Failed to add account to channel");
                }
            }
        }

        Ok(EnrollOutcome::Enrolled {
            team_added,
            channels_added,
            channel_failures,
        })
    }

    /// Loads a fresh roster and enrolls a single account.
    pub async fn enroll_one(&self, session: &Session, account_id: &str) -> SyncResult<EnrollOutcome> {
        let mut roster = self.roster(session).await?;
        self.enroll(session, &mut roster, account_id).await
    }

    /// Re-runs enrollment for every active, linked account.
    pub async fn rescan(
        &self,
        session: &Session,
        accounts: &[AccountRecord],
    ) -> SyncResult<RescanReport> {
        let mut roster = self.roster(session).await?;
        Ok(self.enroll_all(session, &mut roster, accounts).await)
    }

    /// Adds every active, linked account to one newly prescribed channel.
    pub async fn rescan_channel(
        &self,
        session: &Session,
        channel_id: &str,
        accounts: &[AccountRecord],
    ) -> SyncResult<RescanReport> {
        let mut roster = self.channel_roster(session, channel_id).await?;
        Ok(self.enroll_all(session, &mut roster, accounts).await)
    }

    async fn enroll_all(
        &self,
        session: &Session,
        roster: &mut Roster,
        accounts: &[AccountRecord],
    ) -> RescanReport {
        let mut report = RescanReport::default();

        for record in accounts.iter().filter(|r| r.is_active()) {
            let Some(account_id) = record.remote_account_id.as_deref() else {
                continue;
            };
            report.checked += 1;

            match self.enroll(session, roster, account_id).await {
                Ok(EnrollOutcome::Enrolled {
                    team_added,
                    channels_added,
                    channel_failures,
                }) => {
                    report.team_adds += usize::from(team_added);
                    report.channel_adds += channels_added;
                    report.failed += usize::from(channel_failures > 0);
                }
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(email = %record.email, error = %e, "Membership re-scan failed for account");
                }
            }
        }

        report
    }
}
