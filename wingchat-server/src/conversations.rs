//! Server-side conversation store.
//!
//! Holds one append-only message log per [`ConversationKey`]. The store
//! is the sole writer of messages: it assigns identifiers and receipt
//! timestamps, and it is the only place `seen` is ever flipped.
//!
//! Appends and their delivery callback run under the same lock, so every
//! viewer of a conversation receives messages in the order they were
//! appended.

use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use parking_lot::Mutex;
use wingchat_proto::Identity;
use wingchat_proto::conversation::ConversationKey;
use wingchat_proto::message::{Message, MessageId};

/// Default maximum number of messages kept per conversation.
const DEFAULT_MAX_HISTORY: usize = 10_000;

/// In-memory per-conversation message logs with FIFO eviction.
pub struct ConversationStore {
    logs: Mutex<HashMap<ConversationKey, VecDeque<Message>>>,
    max_history: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty store with the default history cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates an empty store keeping at most `max_history` messages per
    /// conversation.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
            max_history,
        }
    }

    /// Appends a message from `sender` to `receiver` and returns it.
    pub fn append(&self, sender: &Identity, receiver: &Identity, text: &str) -> Message {
        self.append_with(sender, receiver, text, |_| {})
    }

    /// Appends a message and runs `deliver` before releasing the log lock.
    ///
    /// `deliver` must not block; it is meant for handing the message to
    /// unbounded connection channels.
    pub fn append_with(
        &self,
        sender: &Identity,
        receiver: &Identity,
        text: &str,
        deliver: impl FnOnce(&Message),
    ) -> Message {
        let key = ConversationKey::new(sender, receiver);
        let mut logs = self.logs.lock();
        let log = logs.entry(key).or_default();

        let now = Utc::now();
        let timestamp = log.back().map_or(now, |last| now.max(last.timestamp));
        let message = Message {
            id: MessageId::new(),
            sender: sender.clone(),
            receiver: receiver.clone(),
            text: text.to_string(),
            timestamp,
            seen: false,
        };
        log.push_back(message.clone());
        if log.len() > self.max_history {
            log.pop_front();
        }
        deliver(&message);
        drop(logs);
        message
    }

    /// Returns the conversation between `a` and `b` in ascending order.
    #[must_use]
    pub fn history(&self, a: &Identity, b: &Identity) -> Vec<Message> {
        let logs = self.logs.lock();
        logs.get(&ConversationKey::new(a, b))
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Marks every message `counterpart` sent to `viewer` as seen.
    ///
    /// Returns how many messages flipped from unseen to seen.
    pub fn mark_seen(&self, viewer: &Identity, counterpart: &Identity) -> usize {
        self.mark_seen_with(viewer, counterpart, |_| {})
    }

    /// Marks the conversation seen and runs `deliver` with the flip count
    /// before releasing the log lock.
    ///
    /// A message appended afterwards is always delivered after whatever
    /// `deliver` sends, so a seen receipt never covers a message the
    /// store still holds as unseen.
    pub fn mark_seen_with(
        &self,
        viewer: &Identity,
        counterpart: &Identity,
        deliver: impl FnOnce(usize),
    ) -> usize {
        let mut logs = self.logs.lock();
        let mut flipped = 0;
        if let Some(log) = logs.get_mut(&ConversationKey::new(viewer, counterpart)) {
            for message in log
                .iter_mut()
                .filter(|m| !m.seen && m.sender == *counterpart && m.receiver == *viewer)
            {
                message.seen = true;
                flipped += 1;
            }
        }
        deliver(flipped);
        drop(logs);
        flipped
    }
}
