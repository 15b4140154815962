//! Named events carried over the real-time channel.
//!
//! Each direction is a tagged union serialized as
//! `{"event": "<name>", "data": <payload>}`. Receivers dispatch with an
//! exhaustive `match` instead of string-keyed handlers.

use serde::{Deserialize, Serialize};

use crate::Identity;
use crate::message::{Message, OutgoingMessage};
use crate::notification::{Notification, NotificationId};
use crate::presence::OnlineStatus;

/// Events sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Associates the connection with an identity. Must be sent first.
    Join(Identity),
    /// Asks whether an identity is online; answered by `onlineStatus`.
    CheckOnlineStatus(Identity),
    /// Submits a message for delivery.
    SendMessage(OutgoingMessage),
    /// Acknowledges every message the counterpart sent to `user_id`.
    MarkMessagesAsSeen(SeenRequest),
    /// Requests the full unread set; answered by `unreadNotifications`.
    GetUnreadNotifications(Identity),
    /// Acknowledges one notification; answered by `notificationRead`.
    MarkNotificationAsRead(ReadRequest),
    /// Declares the conversation the client is currently looking at.
    ViewConversation(ConversationRef),
    /// Declares that no conversation is on screen any more.
    LeaveConversation,
}

impl ClientEvent {
    /// Short event name, used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::CheckOnlineStatus(_) => "checkOnlineStatus",
            Self::SendMessage(_) => "sendMessage",
            Self::MarkMessagesAsSeen(_) => "markMessagesAsSeen",
            Self::GetUnreadNotifications(_) => "getUnreadNotifications",
            Self::MarkNotificationAsRead(_) => "markNotificationAsRead",
            Self::ViewConversation(_) => "viewConversation",
            Self::LeaveConversation => "leaveConversation",
        }
    }
}

/// Events sent from the server to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Confirms a `join`.
    Joined(Identity),
    /// A message accepted in one of the recipient's conversations.
    MessageReceived(Message),
    /// The counterpart `by` has seen every message sent to them.
    MessagesSeen(SeenBy),
    /// A request could not be honoured; the connection stays open.
    MessageError(ErrorDescriptor),
    /// Answer to `checkOnlineStatus`.
    OnlineStatus(OnlineStatus),
    /// Global broadcast: an identity connected.
    UserOnline(Identity),
    /// Global broadcast: an identity disconnected.
    UserOffline(Identity),
    /// A new unread notification for the recipient.
    NewNotification(Notification),
    /// Full snapshot of the recipient's unread notifications.
    UnreadNotifications(Vec<Notification>),
    /// A notification was read and removed.
    NotificationRead(NotificationId),
    /// Every notification of a conversation was removed.
    NotificationsCleared(ConversationRef),
}

impl ServerEvent {
    /// Short event name, used in log fields.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Joined(_) => "joined",
            Self::MessageReceived(_) => "messageReceived",
            Self::MessagesSeen(_) => "messagesSeen",
            Self::MessageError(_) => "messageError",
            Self::OnlineStatus(_) => "onlineStatus",
            Self::UserOnline(_) => "userOnline",
            Self::UserOffline(_) => "userOffline",
            Self::NewNotification(_) => "newNotification",
            Self::UnreadNotifications(_) => "unreadNotifications",
            Self::NotificationRead(_) => "notificationRead",
            Self::NotificationsCleared(_) => "notificationsCleared",
        }
    }
}

/// Payload of `markMessagesAsSeen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenRequest {
    /// Counterpart whose messages are acknowledged.
    pub conversation_id: Identity,
    /// The acknowledging identity.
    pub user_id: Identity,
}

/// Payload of `markNotificationAsRead`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    /// Notification being acknowledged.
    pub notification_id: NotificationId,
}

/// Names a conversation by its counterpart identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    /// Counterpart identity.
    pub conversation_id: Identity,
}

/// Payload of `messagesSeen`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenBy {
    /// Identity that acknowledged.
    pub by: Identity,
}

/// Machine-readable reason carried by `messageError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    /// Message text was empty or whitespace.
    EmptyMessage,
    /// Message text exceeded the server limit.
    MessageTooLarge,
    /// A payload named an identity other than the joined one.
    IdentityMismatch,
    /// The frame arrived before `join`, or `join` was repeated.
    NotJoined,
    /// The frame could not be decoded.
    Malformed,
}

/// Error descriptor carried by `messageError`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl ErrorDescriptor {
    /// Builds a descriptor from a code and description.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
