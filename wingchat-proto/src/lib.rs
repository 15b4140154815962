//! Shared protocol definitions for the `Wingchat` wire format.

pub mod codec;
pub mod conversation;
pub mod event;
pub mod identity;
pub mod message;
pub mod notification;
pub mod presence;

pub use identity::Identity;
