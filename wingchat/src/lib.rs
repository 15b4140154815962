//! `Wingchat` client messaging core.
//!
//! A managed real-time connection plus the client-side stores for the
//! open conversation, watched presence and unread notifications.

pub mod config;
pub mod connection;
pub mod conversation;
pub mod history;
pub mod notifications;
pub mod presence;
pub mod session;
