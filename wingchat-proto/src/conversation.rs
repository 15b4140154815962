//! Conversation keys.
//!
//! A conversation is the unordered pair of its two participants. On the
//! wire it is named by the counterpart's identity; servers key their logs
//! by [`ConversationKey`] so both directions land in the same log.

use crate::Identity;

/// Normalized unordered pair of identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: Identity,
    high: Identity,
}

impl ConversationKey {
    /// Builds the key for the conversation between `a` and `b`.
    #[must_use]
    pub fn new(a: &Identity, b: &Identity) -> Self {
        if a <= b {
            Self {
                low: a.clone(),
                high: b.clone(),
            }
        } else {
            Self {
                low: b.clone(),
                high: a.clone(),
            }
        }
    }
}
