//! Chat message types exchanged between participants.
//!
//! A [`Message`] is created by the server when it accepts an
//! [`OutgoingMessage`]. The server assigns its identifier and receipt
//! timestamp; the timestamp a client attaches to an outgoing message is
//! advisory and only used for diagnostics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Identity;

/// Default maximum message text length in bytes.
pub const MAX_TEXT_LEN: usize = 4096;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message accepted by the server and appended to a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Who sent the message.
    pub sender: Identity,
    /// Who the message is addressed to.
    pub receiver: Identity,
    /// Message body.
    pub text: String,
    /// Server receipt time; defines ordering within the conversation.
    pub timestamp: DateTime<Utc>,
    /// Whether the receiver has acknowledged viewing the message.
    pub seen: bool,
}

impl Message {
    /// Returns `true` if the message travels between `a` and `b`, in
    /// either direction.
    #[must_use]
    pub fn is_between(&self, a: &Identity, b: &Identity) -> bool {
        (self.sender == *a && self.receiver == *b) || (self.sender == *b && self.receiver == *a)
    }
}

/// Payload of a `sendMessage` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Sending identity; the server rejects mismatches with the joined one.
    pub sender_id: Identity,
    /// Receiving identity.
    pub receiver_id: Identity,
    /// Message body.
    pub text: String,
    /// Client clock at send time (advisory).
    pub timestamp: DateTime<Utc>,
}

/// Errors from validating message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The text is empty or whitespace only.
    #[error("message text is empty")]
    Empty,
    /// The text exceeds the maximum allowed length.
    #[error("message text too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// Checks that `text` is non-blank and at most `max_len` bytes.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] or [`ValidationError::TooLarge`].
pub fn validate_text(text: &str, max_len: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if text.len() > max_len {
        return Err(ValidationError::TooLarge {
            size: text.len(),
            max: max_len,
        });
    }
    Ok(())
}
