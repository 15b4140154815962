//! Server-side unread notification engine.
//!
//! Each recipient has an unread list ordered most-recent-first. Items
//! leave the list individually when read, or in bulk when the recipient
//! marks the owning conversation as seen. There is no expiry.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use wingchat_proto::Identity;
use wingchat_proto::notification::{Notification, NotificationId};

/// Default maximum number of unread notifications per recipient.
const DEFAULT_MAX_UNREAD: usize = 500;

/// Per-recipient unread notification lists.
pub struct NotificationEngine {
    unread: Mutex<HashMap<Identity, VecDeque<Notification>>>,
    max_unread: usize,
}

impl Default for NotificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationEngine {
    /// Creates an empty engine with the default cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_unread(DEFAULT_MAX_UNREAD)
    }

    /// Creates an empty engine keeping at most `max_unread` items per
    /// recipient; the oldest item is dropped when the cap is exceeded.
    #[must_use]
    pub fn with_max_unread(max_unread: usize) -> Self {
        Self {
            unread: Mutex::new(HashMap::new()),
            max_unread,
        }
    }

    /// Creates and stores a notification for `recipient`.
    pub fn create(
        &self,
        recipient: &Identity,
        conversation_id: &Identity,
        content: &str,
    ) -> Notification {
        let notification = Notification {
            id: NotificationId::new(),
            recipient: recipient.clone(),
            conversation_id: conversation_id.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        let mut unread = self.unread.lock();
        let list = unread.entry(recipient.clone()).or_default();
        list.push_front(notification.clone());
        if list.len() > self.max_unread {
            list.pop_back();
        }
        drop(unread);
        notification
    }

    /// Unread notifications for `recipient`, most recent first.
    #[must_use]
    pub fn unread(&self, recipient: &Identity) -> Vec<Notification> {
        self.unread
            .lock()
            .get(recipient)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes one notification. Returns `true` if it was present.
    ///
    /// Only the recipient's own list is searched.
    pub fn mark_read(&self, recipient: &Identity, id: NotificationId) -> bool {
        let mut unread = self.unread.lock();
        let Some(list) = unread.get_mut(recipient) else {
            return false;
        };
        let before = list.len();
        list.retain(|n| n.id != id);
        before != list.len()
    }

    /// Removes every notification of `conversation_id` for `recipient`.
    ///
    /// Returns how many were removed.
    pub fn clear_conversation(&self, recipient: &Identity, conversation_id: &Identity) -> usize {
        let mut unread = self.unread.lock();
        let Some(list) = unread.get_mut(recipient) else {
            return 0;
        };
        let before = list.len();
        list.retain(|n| n.conversation_id != *conversation_id);
        before - list.len()
    }

    /// Number of unread notifications for `recipient`.
    #[must_use]
    pub fn unread_count(&self, recipient: &Identity) -> usize {
        self.unread.lock().get(recipient).map_or(0, VecDeque::len)
    }
}
