//! Client view of the open conversation.
//!
//! At most one conversation is open at a time. Its log starts from the
//! REST history and grows with `messageReceived` events; the server's
//! order is kept as-is. The store never appends on send: the accepted
//! copy comes back from the server like any other message.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use wingchat_proto::Identity;
use wingchat_proto::event::{ClientEvent, ConversationRef, SeenRequest};
use wingchat_proto::message::{Message, MessageId, OutgoingMessage, ValidationError, validate_text};

/// Display status of a message in the open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Accepted by the server, not yet seen by the receiver.
    Sent,
    /// The receiver has viewed the conversation since it arrived.
    Seen,
}

/// Why a send was refused locally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Empty or whitespace-only text.
    #[error("message text is empty")]
    Empty,
    /// Text exceeds the configured limit.
    #[error("message text too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
    /// No conversation is open.
    #[error("no conversation is open")]
    NoConversation,
}

impl From<ValidationError> for SendError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Empty => Self::Empty,
            ValidationError::TooLarge { size, max } => Self::TooLarge { size, max },
        }
    }
}

/// Messages of the open conversation, in server order.
#[derive(Debug)]
pub struct ConversationStore {
    me: Identity,
    counterpart: Option<Identity>,
    messages: Vec<Message>,
    known: HashSet<MessageId>,
    max_text_len: usize,
}

impl ConversationStore {
    /// Creates a store for `me` with nothing open.
    #[must_use]
    pub fn new(me: Identity, max_text_len: usize) -> Self {
        Self {
            me,
            counterpart: None,
            messages: Vec::new(),
            known: HashSet::new(),
            max_text_len,
        }
    }

    /// Opens the conversation with `counterpart`, replacing the log with
    /// `history` (ascending order, as returned by the server).
    ///
    /// Returns the events to emit: `viewConversation` and
    /// `markMessagesAsSeen`.
    pub fn open(&mut self, counterpart: Identity, history: Vec<Message>) -> Vec<ClientEvent> {
        self.messages.clear();
        self.known.clear();
        for message in history {
            if message.is_between(&self.me, &counterpart) && self.known.insert(message.id) {
                self.messages.push(message);
            }
        }
        self.counterpart = Some(counterpart);
        self.mark_incoming_seen();
        self.subscribe_events()
    }

    /// Closes the open conversation, if any.
    pub fn close(&mut self) -> Option<ClientEvent> {
        self.counterpart.take()?;
        self.messages.clear();
        self.known.clear();
        Some(ClientEvent::LeaveConversation)
    }

    /// Events that re-establish the open conversation after a reconnect.
    #[must_use]
    pub fn resubscribe(&self) -> Vec<ClientEvent> {
        self.subscribe_events()
    }

    /// Builds a `sendMessage` event for the open conversation.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] for blank or oversize text, or when nothing
    /// is open.
    pub fn send(&self, text: &str, now: DateTime<Utc>) -> Result<ClientEvent, SendError> {
        validate_text(text, self.max_text_len)?;
        let receiver = self.counterpart.clone().ok_or(SendError::NoConversation)?;
        Ok(ClientEvent::SendMessage(OutgoingMessage {
            sender_id: self.me.clone(),
            receiver_id: receiver,
            text: text.to_string(),
            timestamp: now,
        }))
    }

    /// Applies a `messageReceived` event.
    ///
    /// Messages outside the open conversation, or already present, are
    /// ignored. When the message comes from the counterpart, returns the
    /// `markMessagesAsSeen` to emit.
    pub fn on_message_received(&mut self, mut message: Message) -> Option<ClientEvent> {
        let counterpart = self.counterpart.as_ref()?;
        if !message.is_between(&self.me, counterpart) || !self.known.insert(message.id) {
            return None;
        }
        let from_counterpart = message.sender == *counterpart;
        if from_counterpart {
            message.seen = true;
        }
        self.messages.push(message);
        from_counterpart.then(|| self.seen_request())
    }

    /// Applies a `messagesSeen` event. Returns how many of our messages
    /// flipped to seen.
    pub fn on_messages_seen(&mut self, by: &Identity) -> usize {
        if self.counterpart.as_ref() != Some(by) {
            return 0;
        }
        let mut flipped = 0;
        for message in &mut self.messages {
            if message.sender == self.me && !message.seen {
                message.seen = true;
                flipped += 1;
            }
        }
        flipped
    }

    /// Display status of `message`.
    #[must_use]
    pub const fn delivery_status(message: &Message) -> DeliveryStatus {
        if message.seen {
            DeliveryStatus::Seen
        } else {
            DeliveryStatus::Sent
        }
    }

    /// The open counterpart.
    #[must_use]
    pub const fn counterpart(&self) -> Option<&Identity> {
        self.counterpart.as_ref()
    }

    /// The open conversation's log in server order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Projection of the log grouped by calendar day (UTC), in order.
    #[must_use]
    pub fn grouped_by_date(&self) -> Vec<(NaiveDate, Vec<&Message>)> {
        let mut groups: Vec<(NaiveDate, Vec<&Message>)> = Vec::new();
        for message in &self.messages {
            let day = message.timestamp.date_naive();
            match groups.last_mut() {
                Some((last, items)) if *last == day => items.push(message),
                _ => groups.push((day, vec![message])),
            }
        }
        groups
    }

    fn subscribe_events(&self) -> Vec<ClientEvent> {
        let Some(counterpart) = &self.counterpart else {
            return Vec::new();
        };
        vec![
            ClientEvent::ViewConversation(ConversationRef {
                conversation_id: counterpart.clone(),
            }),
            self.seen_request(),
        ]
    }

    fn seen_request(&self) -> ClientEvent {
        let conversation_id = self.counterpart.clone().unwrap_or_else(|| self.me.clone());
        ClientEvent::MarkMessagesAsSeen(SeenRequest {
            conversation_id,
            user_id: self.me.clone(),
        })
    }

    fn mark_incoming_seen(&mut self) {
        for message in &mut self.messages {
            if message.receiver == self.me {
                message.seen = true;
            }
        }
    }
}
