//! Client notification center.
//!
//! Mirrors the server's unread list for the current identity. A
//! mark-as-read hides the item right away but only removes it once the
//! server echoes `notificationRead`; if no echo arrives within the ack
//! window the item becomes visible again.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use wingchat_proto::Identity;
use wingchat_proto::event::{ClientEvent, ReadRequest};
use wingchat_proto::notification::{Notification, NotificationId};

/// Unread notifications, most recent first, with pending removals.
#[derive(Debug, Clone)]
pub struct NotificationCenter {
    items: Vec<Notification>,
    /// Items hidden while their `notificationRead` echo is outstanding,
    /// keyed to the deadline after which they reappear.
    pending: HashMap<NotificationId, Instant>,
    ack_window: Duration,
}

impl NotificationCenter {
    /// Creates an empty center with the given ack window.
    #[must_use]
    pub fn new(ack_window: Duration) -> Self {
        Self {
            items: Vec::new(),
            pending: HashMap::new(),
            ack_window,
        }
    }

    /// Replaces the whole list with a server snapshot.
    ///
    /// Pending removals for items absent from the snapshot are dropped;
    /// the ones still present stay hidden.
    pub fn replace_all(&mut self, snapshot: Vec<Notification>) {
        self.items = snapshot;
        let items = &self.items;
        self.pending.retain(|id, _| items.iter().any(|n| n.id == *id));
    }

    /// Adds a freshly created notification at the front. Returns `false`
    /// for a duplicate.
    pub fn on_new(&mut self, notification: Notification) -> bool {
        if self.items.iter().any(|n| n.id == notification.id) {
            return false;
        }
        self.items.insert(0, notification);
        true
    }

    /// Hides `id` pending the server's echo and returns the event to
    /// emit. Returns `None` if the item is unknown or already pending.
    pub fn mark_as_read(&mut self, id: NotificationId, now: Instant) -> Option<ClientEvent> {
        if self.pending.contains_key(&id) || !self.items.iter().any(|n| n.id == id) {
            return None;
        }
        self.pending.insert(id, now + self.ack_window);
        Some(ClientEvent::MarkNotificationAsRead(ReadRequest {
            notification_id: id,
        }))
    }

    /// Applies a `notificationRead` echo. Idempotent.
    pub fn on_notification_read(&mut self, id: NotificationId) -> bool {
        self.pending.remove(&id);
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        before != self.items.len()
    }

    /// Applies `notificationsCleared`: removes every item of
    /// `conversation_id`, pending or not. Returns how many were removed.
    pub fn on_cleared(&mut self, conversation_id: &Identity) -> usize {
        let before = self.items.len();
        let pending = &mut self.pending;
        self.items.retain(|n| {
            let keep = n.conversation_id != *conversation_id;
            if !keep {
                pending.remove(&n.id);
            }
            keep
        });
        before - self.items.len()
    }

    /// Rolls back removals whose ack window has elapsed. Returns the ids
    /// that became visible again.
    pub fn expire_pending(&mut self, now: Instant) -> Vec<NotificationId> {
        let expired: Vec<_> = self
            .pending
            .iter()
            .filter(|&(_, deadline)| *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.pending.remove(id);
            tracing::warn!(notification = %id, "no read acknowledgement, restoring notification");
        }
        expired
    }

    /// Visible notifications, most recent first.
    pub fn visible(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter().filter(|n| !self.pending.contains_key(&n.id))
    }

    /// Number of visible notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.visible().count()
    }

    /// Returns `true` while `id` waits for its echo.
    #[must_use]
    pub fn is_pending(&self, id: NotificationId) -> bool {
        self.pending.contains_key(&id)
    }
}
