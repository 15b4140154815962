//! Client-side presence of watched identities.
//!
//! The server broadcasts every online/offline transition to everybody;
//! this tracker keeps only the identities the client asked about.

use std::collections::HashMap;

use wingchat_proto::Identity;
use wingchat_proto::event::ClientEvent;
use wingchat_proto::presence::{OnlineStatus, PresenceState};

/// Last known presence of each watched identity.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    watched: HashMap<Identity, PresenceState>,
}

impl PresenceTracker {
    /// Creates a tracker watching nobody.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching `identity` and returns the status query to emit.
    ///
    /// The state stays [`PresenceState::Unknown`] until an answer or a
    /// broadcast arrives.
    pub fn watch(&mut self, identity: Identity) -> ClientEvent {
        self.watched.entry(identity.clone()).or_default();
        ClientEvent::CheckOnlineStatus(identity)
    }

    /// Stops watching `identity`.
    pub fn unwatch(&mut self, identity: &Identity) {
        self.watched.remove(identity);
    }

    /// Last known presence of `identity`.
    #[must_use]
    pub fn status(&self, identity: &Identity) -> PresenceState {
        self.watched.get(identity).copied().unwrap_or_default()
    }

    /// Applies an `onlineStatus` answer. Returns the new state if
    /// `identity` is watched.
    pub fn on_online_status(&mut self, status: &OnlineStatus) -> Option<PresenceState> {
        self.set(&status.user_id, PresenceState::from_online(status.is_online))
    }

    /// Applies a `userOnline` broadcast.
    pub fn on_user_online(&mut self, identity: &Identity) -> Option<PresenceState> {
        self.set(identity, PresenceState::Online)
    }

    /// Applies a `userOffline` broadcast.
    pub fn on_user_offline(&mut self, identity: &Identity) -> Option<PresenceState> {
        self.set(identity, PresenceState::Offline)
    }

    /// Status queries for every watched identity, used after a reconnect.
    #[must_use]
    pub fn resubscribe(&self) -> Vec<ClientEvent> {
        let mut ids: Vec<_> = self.watched.keys().cloned().collect();
        ids.sort();
        ids.into_iter().map(ClientEvent::CheckOnlineStatus).collect()
    }

    fn set(&mut self, identity: &Identity, state: PresenceState) -> Option<PresenceState> {
        let slot = self.watched.get_mut(identity)?;
        *slot = state;
        Some(state)
    }
}
