//! Server-side presence records.
//!
//! A record is created on an identity's first join and is never deleted;
//! after disconnect it stays as offline.

use std::collections::HashMap;

use parking_lot::RwLock;
use wingchat_proto::Identity;

/// Online/offline status per identity.
#[derive(Default)]
pub struct PresenceTracker {
    records: RwLock<HashMap<Identity, bool>>,
}

impl PresenceTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `identity` online. Returns `true` if it was not online before.
    pub fn set_online(&self, identity: &Identity) -> bool {
        let previous = self.records.write().insert(identity.clone(), true);
        previous != Some(true)
    }

    /// Marks `identity` offline. Returns `true` if it was online before.
    pub fn set_offline(&self, identity: &Identity) -> bool {
        let previous = self.records.write().insert(identity.clone(), false);
        previous == Some(true)
    }

    /// Whether `identity` currently holds a connection. Unknown identities
    /// are reported offline.
    #[must_use]
    pub fn is_online(&self, identity: &Identity) -> bool {
        self.records.read().get(identity).copied().unwrap_or(false)
    }

    /// All identities currently online, sorted.
    #[must_use]
    pub fn online_identities(&self) -> Vec<Identity> {
        let mut online: Vec<_> = self
            .records
            .read()
            .iter()
            .filter(|(_, online)| **online)
            .map(|(id, _)| id.clone())
            .collect();
        online.sort();
        online
    }
}
