//! Presence tracking: who is currently viewing/editing a document.
//!
//! Pure state sourced from channel join/leave events. The tracker owns
//! the membership set and emits a delta only when membership actually
//! changed, so downstream consumers never re-render on duplicate joins.
//! The local user is always a member and is flagged `is_current_user`.

use std::collections::HashMap;

use coscribe_core::{UserId, UserProfile};

use crate::protocol::PeerInfo;

/// One member of a document's presence set.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub username: String,
    pub is_current_user: bool,
}

/// Membership change produced by a join/leave event.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceDelta {
    Joined(PresenceEntry),
    Left(UserId),
}

/// Tracks the membership set for one open document.
pub struct PresenceTracker {
    local: UserProfile,
    /// Remote members keyed by user id.
    remote: HashMap<UserId, String>,
}

impl PresenceTracker {
    pub fn new(local: UserProfile) -> Self {
        Self {
            local,
            remote: HashMap::new(),
        }
    }

    /// Record a join. Returns the delta, or `None` for a duplicate join
    /// or the local user's own echo.
    pub fn handle_join(&mut self, info: PeerInfo) -> Option<PresenceDelta> {
        if info.user_id == self.local.id {
            return None;
        }
        if self.remote.contains_key(&info.user_id) {
            return None;
        }
        self.remote.insert(info.user_id, info.username.clone());
        Some(PresenceDelta::Joined(PresenceEntry {
            user_id: info.user_id,
            username: info.username,
            is_current_user: false,
        }))
    }

    /// Record a leave. Returns the delta, or `None` when the user was not
    /// a member. The local user never leaves its own set.
    pub fn handle_leave(&mut self, user_id: UserId) -> Option<PresenceDelta> {
        if user_id == self.local.id {
            return None;
        }
        self.remote
            .remove(&user_id)
            .map(|_| PresenceDelta::Left(user_id))
    }

    /// Current membership: remote members plus the local user (flagged),
    /// ordered by user id for a stable rendering order.
    pub fn entries(&self) -> Vec<PresenceEntry> {
        let mut entries: Vec<PresenceEntry> = self
            .remote
            .iter()
            .map(|(id, name)| PresenceEntry {
                user_id: *id,
                username: name.clone(),
                is_current_user: false,
            })
            .collect();
        entries.push(PresenceEntry {
            user_id: self.local.id,
            username: self.local.username.clone(),
            is_current_user: true,
        });
        entries.sort_by_key(|e| e.user_id);
        entries
    }

    /// Look up a member's display name, for conflict attribution.
    pub fn username_of(&self, user_id: UserId) -> Option<String> {
        if user_id == self.local.id {
            return Some(self.local.username.clone());
        }
        self.remote.get(&user_id).cloned()
    }

    /// Number of members including the local user.
    pub fn member_count(&self) -> usize {
        self.remote.len() + 1
    }

    /// Drop all remote members. Called when the push channel drops:
    /// membership can no longer be trusted and is rebuilt from joins on
    /// reconnect.
    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }
}
