//! Presence tracking for Beacon.
//!
//! Presence is tracked per logical user, not per socket: a user with two
//! open tabs occupies a channel once, and the channel reports a transition
//! only when the first connection arrives or the last one leaves. The
//! registry keeps a set of backing connections per user so that "last
//! connection leaving" is distinguishable from "one of several leaving".
//!
//! State lives for the process lifetime only; entries are created on the
//! first successful join and destroyed when the last connection drains.

use crate::traits::ConnectionId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// A user visible in a presence channel's roster.
///
/// Uniquely keyed by `user_id` within a channel, regardless of how many
/// connections the user holds open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    /// Logical user identity, assigned by the application server.
    pub user_id: String,
    /// Application-defined metadata shared with other members.
    #[serde(default)]
    pub user_info: serde_json::Value,
}

impl PresenceMember {
    /// Create a member with no metadata.
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_info: serde_json::Value::Null,
        }
    }

    /// Create a member with metadata.
    #[must_use]
    pub fn with_info(mut self, user_info: serde_json::Value) -> Self {
        self.user_info = user_info;
        self
    }
}

/// Outcome of recording a connection's join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinTransition {
    /// No other live connection mapped to this user in this channel.
    FirstJoin,
    /// The user was already present through another (or the same) connection.
    AlreadyPresent,
}

/// Outcome of recording a connection's leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveTransition {
    /// The user's last connection left; the member entry was removed.
    LastLeave,
    /// Other connections still back this user.
    StillPresent,
    /// The connection was not tracked for this user and channel.
    NotFound,
}

/// A user's roster entry plus the connections backing it.
#[derive(Debug)]
struct MemberEntry {
    member: PresenceMember,
    connections: HashSet<ConnectionId>,
}

/// Per-channel roster, ordered by user id for stable snapshots.
#[derive(Debug, Default)]
struct Roster {
    members: BTreeMap<String, MemberEntry>,
}

/// Process-wide presence state across all channels.
///
/// `join` and `leave` each run entirely under the map entry lock for their
/// channel, so concurrent calls targeting the same user serialize and
/// exactly one of them observes the transition.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    channels: DashMap<String, Roster>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `conn` joined `channel` as `member`.
    ///
    /// Returns [`JoinTransition::FirstJoin`] iff no other live connection
    /// currently maps to `member.user_id` in this channel. The connection
    /// is recorded in both cases; re-joining from the same connection is
    /// idempotent.
    pub fn join(
        &self,
        channel: &str,
        conn: &ConnectionId,
        member: PresenceMember,
    ) -> JoinTransition {
        let mut roster = self.channels.entry(channel.to_string()).or_default();

        match roster.members.entry(member.user_id.clone()) {
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                entry.get_mut().connections.insert(conn.clone());
                JoinTransition::AlreadyPresent
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                let user_id = member.user_id.clone();
                slot.insert(MemberEntry {
                    member,
                    connections: HashSet::from([conn.clone()]),
                });
                debug!(channel = %channel, user = %user_id, connection = %conn, "Presence: user joined");
                JoinTransition::FirstJoin
            }
        }
    }

    /// Record that `conn` left `channel` for `user_id`.
    ///
    /// Returns [`LeaveTransition::LastLeave`] iff the user's connection set
    /// drained, removing the member entry. An untracked connection yields
    /// [`LeaveTransition::NotFound`]; leave is idempotent.
    pub fn leave(&self, channel: &str, conn: &ConnectionId, user_id: &str) -> LeaveTransition {
        let transition = {
            let Some(mut roster) = self.channels.get_mut(channel) else {
                return LeaveTransition::NotFound;
            };

            let Some(entry) = roster.members.get_mut(user_id) else {
                return LeaveTransition::NotFound;
            };

            if !entry.connections.remove(conn) {
                return LeaveTransition::NotFound;
            }

            if entry.connections.is_empty() {
                roster.members.remove(user_id);
                debug!(channel = %channel, user = %user_id, connection = %conn, "Presence: user left");
                LeaveTransition::LastLeave
            } else {
                LeaveTransition::StillPresent
            }
        };

        if transition == LeaveTransition::LastLeave {
            // Guard dropped above; re-check under the entry lock before
            // removing so a racing join keeps its roster.
            self.channels
                .remove_if(channel, |_, roster| roster.members.is_empty());
        }

        transition
    }

    /// Snapshot of the channel's current members.
    ///
    /// Copy-on-read: safe to iterate while concurrent joins and leaves
    /// proceed.
    #[must_use]
    pub fn members(&self, channel: &str) -> Vec<PresenceMember> {
        self.channels
            .get(channel)
            .map(|roster| roster.members.values().map(|e| e.member.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of distinct users present in the channel.
    #[must_use]
    pub fn member_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|roster| roster.members.len())
            .unwrap_or(0)
    }

    /// Whether the given user is currently present in the channel.
    #[must_use]
    pub fn is_present(&self, channel: &str, user_id: &str) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|roster| roster.members.contains_key(user_id))
    }

    /// Total number of presence members across all channels.
    #[must_use]
    pub fn total_members(&self) -> usize {
        self.channels.iter().map(|r| r.members.len()).sum()
    }
}
