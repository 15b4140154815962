//! Presence status types for online/offline tracking.

use serde::{Deserialize, Serialize};

use crate::Identity;

/// Last known presence of an identity, as seen by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PresenceState {
    /// No status has been observed yet.
    #[default]
    Unknown,
    /// The identity holds a live connection.
    Online,
    /// The identity has disconnected.
    Offline,
}

impl PresenceState {
    /// Maps an `isOnline` flag to a presence state.
    #[must_use]
    pub const fn from_online(is_online: bool) -> Self {
        if is_online { Self::Online } else { Self::Offline }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// Answer to a `checkOnlineStatus` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatus {
    /// The identity that was queried.
    pub user_id: Identity,
    /// Whether it currently holds a connection.
    pub is_online: bool,
}
