//! `Wingchat` messaging server library.
//!
//! Exposes the server for use in tests and embedding. The server accepts
//! WebSocket connections, registers identities, and owns conversation
//! logs, presence records, and unread notifications.

pub mod config;
pub mod conversations;
pub mod http;
pub mod notifications;
pub mod presence;
pub mod server;
