//! JSON encoding and boundary validation for real-time events.
//!
//! Frames are WebSocket text frames carrying one event each. Decoding
//! rejects frames that parse but carry a blank identity where one is
//! required, so handlers never see an unusable identity.

use crate::event::{ClientEvent, ServerEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialize(String),
    /// The frame is not a valid event of the expected direction.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The frame decoded but failed boundary validation.
    #[error("invalid event {event}: {reason}")]
    Invalid {
        /// Event name.
        event: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Encodes a [`ClientEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialize` if the event cannot be serialized.
pub fn encode_client(event: &ClientEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Decodes and validates a [`ClientEvent`] from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a client event, or
/// `CodecError::Invalid` if a required identity is blank.
pub fn decode_client(text: &str) -> Result<ClientEvent, CodecError> {
    let event: ClientEvent =
        serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))?;
    validate_client(&event)?;
    Ok(event)
}

/// Encodes a [`ServerEvent`] as a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Serialize` if the event cannot be serialized.
pub fn encode_server(event: &ServerEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialize(e.to_string()))
}

/// Decodes a [`ServerEvent`] from a JSON text frame.
///
/// # Errors
///
/// Returns `CodecError::Malformed` if the text is not a server event.
pub fn decode_server(text: &str) -> Result<ServerEvent, CodecError> {
    serde_json::from_str(text).map_err(|e| CodecError::Malformed(e.to_string()))
}

fn validate_client(event: &ClientEvent) -> Result<(), CodecError> {
    let blank = match event {
        ClientEvent::Join(id)
        | ClientEvent::CheckOnlineStatus(id)
        | ClientEvent::GetUnreadNotifications(id) => id.is_blank(),
        ClientEvent::SendMessage(msg) => msg.sender_id.is_blank() || msg.receiver_id.is_blank(),
        ClientEvent::MarkMessagesAsSeen(req) => {
            req.conversation_id.is_blank() || req.user_id.is_blank()
        }
        ClientEvent::ViewConversation(conv) => conv.conversation_id.is_blank(),
        ClientEvent::MarkNotificationAsRead(_) | ClientEvent::LeaveConversation => false,
    };
    if blank {
        return Err(CodecError::Invalid {
            event: event.name(),
            reason: "identity must not be empty",
        });
    }
    Ok(())
}
