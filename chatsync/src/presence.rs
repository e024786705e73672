//! Last-known roster for the currently active chat.

use std::collections::HashMap;

use parking_lot::RwLock;

use chatsync_proto::frame::Member;

/// Presence status of a chat member.
///
/// The roster protocol carries no liveness information, so every tracked
/// member reports [`Unknown`](Self::Unknown).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PresenceStatus {
    /// No liveness information available.
    Unknown,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tracks the roster of the active chat, keyed by member id.
///
/// Each roster push replaces the map wholesale; there is no merge with
/// prior state, so the last push always wins.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    roster: RwLock<HashMap<String, PresenceStatus>>,
}

impl PresenceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked roster with the given member list.
    pub fn apply_roster(&self, members: &[Member]) {
        let fresh: HashMap<String, PresenceStatus> = members
            .iter()
            .map(|m| (m.id.clone(), PresenceStatus::Unknown))
            .collect();
        tracing::debug!(members = fresh.len(), "roster replaced");
        *self.roster.write() = fresh;
    }

    /// Snapshot of the current roster.
    #[must_use]
    pub fn active_members(&self) -> HashMap<String, PresenceStatus> {
        self.roster.read().clone()
    }

    /// Presence status for a single member, if tracked.
    #[must_use]
    pub fn status_of(&self, member_id: &str) -> Option<PresenceStatus> {
        self.roster.read().get(member_id).copied()
    }
}
