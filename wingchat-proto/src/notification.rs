//! Unread-message notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Identity;

/// Unique identifier for a notification (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Creates a new time-ordered notification identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `NotificationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An unread-message marker for a recipient not viewing the conversation.
///
/// `conversation_id` names the conversation by the sender's identity, the
/// counterpart from the recipient's point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Notification identifier.
    pub id: NotificationId,
    /// Who the notification is for.
    pub recipient: Identity,
    /// Counterpart identity naming the conversation.
    pub conversation_id: Identity,
    /// Text of the message that triggered the notification.
    pub content: String,
    /// When the notification was created.
    pub created_at: DateTime<Utc>,
}
