//! Messaging session: dispatches server events into the client stores.
//!
//! The session owns the conversation store, presence tracker and
//! notification center for one identity. Outbound events go through an
//! [`EventSink`] supplied at construction, normally a
//! [`ConnectionHandle`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use wingchat_proto::Identity;
use wingchat_proto::event::{ClientEvent, ConversationRef, ErrorDescriptor, SeenBy, ServerEvent};
use wingchat_proto::message::{MAX_TEXT_LEN, Message};
use wingchat_proto::notification::{Notification, NotificationId};
use wingchat_proto::presence::PresenceState;

use crate::connection::{ConnectionError, ConnectionHandle};
use crate::conversation::{ConversationStore, SendError};
use crate::notifications::NotificationCenter;
use crate::presence::PresenceTracker;

/// Destination for outbound client events.
pub trait EventSink {
    /// Queues `event` for the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the event cannot be queued.
    fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError>;
}

impl EventSink for ConnectionHandle {
    fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        Self::emit(self, event)
    }
}

/// Session tuning.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Maximum message text length in bytes.
    pub max_text_len: usize,
    /// How long a mark-as-read waits for its echo.
    pub ack_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_text_len: MAX_TEXT_LEN,
            ack_window: Duration::from_secs(10),
        }
    }
}

/// What changed after handling a server event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A message was appended to the open conversation.
    MessageAppended(Message),
    /// Our messages in the open conversation were seen.
    MessagesSeen {
        /// Who saw them.
        by: Identity,
        /// How many flipped.
        flipped: usize,
    },
    /// A watched identity changed presence.
    Presence {
        /// Whose presence.
        identity: Identity,
        /// New state.
        state: PresenceState,
    },
    /// A notification arrived.
    NotificationAdded(Notification),
    /// The notification list changed.
    NotificationsChanged {
        /// Visible unread count after the change.
        unread: usize,
    },
    /// The server rejected an event.
    Error(ErrorDescriptor),
}

/// Client-side state of one joined identity.
pub struct MessagingSession<S> {
    identity: Identity,
    sink: S,
    conversation: ConversationStore,
    presence: PresenceTracker,
    notifications: NotificationCenter,
}

impl<S: EventSink> MessagingSession<S> {
    /// Creates a session for `identity` emitting through `sink`.
    pub fn new(identity: Identity, sink: S, config: SessionConfig) -> Self {
        Self {
            conversation: ConversationStore::new(identity.clone(), config.max_text_len),
            presence: PresenceTracker::new(),
            notifications: NotificationCenter::new(config.ack_window),
            identity,
            sink,
        }
    }

    /// The session's identity.
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The open conversation.
    pub const fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// Watched presence.
    pub const fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Unread notifications.
    pub const fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    /// Resubscribes after every successful join: unread snapshot,
    /// presence of every watched identity, and the open conversation.
    pub fn on_connected(&mut self) {
        self.emit(ClientEvent::GetUnreadNotifications(self.identity.clone()));
        for event in self.presence.resubscribe() {
            self.emit(event);
        }
        for event in self.conversation.resubscribe() {
            self.emit(event);
        }
    }

    /// Opens the conversation with `counterpart` from its loaded history
    /// and starts watching its presence.
    pub fn open_conversation(&mut self, counterpart: Identity, history: Vec<Message>) {
        let watch = self.presence.watch(counterpart.clone());
        for event in self.conversation.open(counterpart, history) {
            self.emit(event);
        }
        self.emit(watch);
    }

    /// Closes the open conversation.
    pub fn close_conversation(&mut self) {
        if let Some(event) = self.conversation.close() {
            self.emit(event);
        }
    }

    /// Sends `text` to the open conversation.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the text is rejected locally.
    pub fn send(&mut self, text: &str, now: DateTime<Utc>) -> Result<(), SendError> {
        let event = self.conversation.send(text, now)?;
        self.emit(event);
        Ok(())
    }

    /// Starts watching the presence of `identity`.
    pub fn watch(&mut self, identity: Identity) {
        let event = self.presence.watch(identity);
        self.emit(event);
    }

    /// Marks a notification read. Returns `false` if it is unknown or
    /// already pending.
    pub fn mark_notification_read(&mut self, id: NotificationId, now: Instant) -> bool {
        match self.notifications.mark_as_read(id, now) {
            Some(event) => {
                self.emit(event);
                true
            }
            None => false,
        }
    }

    /// Periodic housekeeping: restores notifications whose read was never
    /// acknowledged.
    pub fn tick(&mut self, now: Instant) -> Vec<NotificationId> {
        self.notifications.expire_pending(now)
    }

    /// Applies one server event.
    pub fn handle(&mut self, event: ServerEvent) -> Option<SessionUpdate> {
        match event {
            ServerEvent::Joined(identity) => {
                tracing::debug!(identity = %identity, "join acknowledged");
                None
            }
            ServerEvent::MessageReceived(message) => {
                let before = self.conversation.messages().len();
                if let Some(seen) = self.conversation.on_message_received(message.clone()) {
                    self.emit(seen);
                }
                (self.conversation.messages().len() > before)
                    .then(|| SessionUpdate::MessageAppended(message))
            }
            ServerEvent::MessagesSeen(SeenBy { by }) => {
                let flipped = self.conversation.on_messages_seen(&by);
                (flipped > 0).then_some(SessionUpdate::MessagesSeen { by, flipped })
            }
            ServerEvent::MessageError(err) => {
                tracing::warn!(code = ?err.code, message = %err.message, "server rejected event");
                Some(SessionUpdate::Error(err))
            }
            ServerEvent::OnlineStatus(status) => self
                .presence
                .on_online_status(&status)
                .map(|state| SessionUpdate::Presence {
                    identity: status.user_id,
                    state,
                }),
            ServerEvent::UserOnline(identity) => self
                .presence
                .on_user_online(&identity)
                .map(|state| SessionUpdate::Presence { identity, state }),
            ServerEvent::UserOffline(identity) => self
                .presence
                .on_user_offline(&identity)
                .map(|state| SessionUpdate::Presence { identity, state }),
            ServerEvent::NewNotification(notification) => self
                .notifications
                .on_new(notification.clone())
                .then_some(SessionUpdate::NotificationAdded(notification)),
            ServerEvent::UnreadNotifications(snapshot) => {
                self.notifications.replace_all(snapshot);
                Some(self.notifications_changed())
            }
            ServerEvent::NotificationRead(id) => self
                .notifications
                .on_notification_read(id)
                .then(|| self.notifications_changed()),
            ServerEvent::NotificationsCleared(ConversationRef { conversation_id }) => {
                let removed = self.notifications.on_cleared(&conversation_id);
                (removed > 0).then(|| self.notifications_changed())
            }
        }
    }

    fn notifications_changed(&self) -> SessionUpdate {
        SessionUpdate::NotificationsChanged {
            unread: self.notifications.unread_count(),
        }
    }

    fn emit(&self, event: ClientEvent) {
        let name = event.name();
        if let Err(e) = self.sink.emit(event) {
            tracing::warn!(event = name, error = %e, "failed to emit event");
        }
    }
}
