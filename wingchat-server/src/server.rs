//! Server core: shared state, WebSocket handler, connection registry, and
//! event routing.
//!
//! Each connection must `join` with its identity before anything else.
//! After that the server routes messages between identities, owns the
//! conversation logs, presence records and unread notifications, and
//! re-broadcasts every mutation to the identities it affects. Clients
//! never mutate shared state themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use wingchat_proto::Identity;
use wingchat_proto::codec;
use wingchat_proto::event::{
    ClientEvent, ConversationRef, ErrorCode, ErrorDescriptor, ReadRequest, SeenBy, SeenRequest,
    ServerEvent,
};
use wingchat_proto::message::{OutgoingMessage, ValidationError, validate_text};
use wingchat_proto::presence::OnlineStatus;

use crate::config::Limits;
use crate::conversations::ConversationStore;
use crate::http;
use crate::notifications::NotificationEngine;
use crate::presence::PresenceTracker;

/// Identifies one accepted WebSocket connection.
pub type ConnectionId = u64;

/// Registry entry for a joined identity.
struct Connection {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<WsMessage>,
    /// Counterpart whose conversation this connection has on screen.
    viewing: Option<Identity>,
}

/// Shared server state: connection registry plus the three stores.
pub struct ServerState {
    /// Maps each joined identity to its single live connection.
    connections: RwLock<HashMap<Identity, Connection>>,
    next_connection_id: AtomicU64,
    /// Per-conversation message logs.
    pub conversations: ConversationStore,
    /// Online/offline records.
    pub presence: PresenceTracker,
    /// Unread notifications per recipient.
    pub notifications: NotificationEngine,
    /// Maximum accepted message text length in bytes.
    max_text_len: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates server state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(Limits::default())
    }

    /// Creates server state with custom limits from the resolved
    /// [`crate::config::ServerConfig`].
    #[must_use]
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            conversations: ConversationStore::with_max_history(limits.max_history),
            presence: PresenceTracker::new(),
            notifications: NotificationEngine::with_max_unread(limits.max_unread),
            max_text_len: limits.max_text_len,
        }
    }

    /// Registers a connection for `identity` and announces it.
    ///
    /// A previous connection for the same identity is replaced: it is sent
    /// a close frame and its sender dropped, which ends its writer task.
    /// Returns the new connection's id and whether one was replaced.
    ///
    /// The presence flip and the `userOnline` fan-out happen under the
    /// registry lock, so they cannot interleave with an `unregister`.
    pub async fn register(
        &self,
        identity: &Identity,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> (ConnectionId, bool) {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let announce = encode_frame(&ServerEvent::UserOnline(identity.clone()));
        let mut conns = self.connections.write().await;
        let old = conns.insert(
            identity.clone(),
            Connection {
                id,
                sender,
                viewing: None,
            },
        );
        let replaced = old.is_some();
        if let Some(previous) = old {
            let _ = previous.sender.send(WsMessage::Close(None));
        }
        if self.presence.set_online(identity) {
            fan_out(&conns, announce, Some(identity));
        }
        drop(conns);
        (id, replaced)
    }

    /// Removes the registry entry for `identity` if it still belongs to
    /// `connection`. Returns `true` if an entry was removed.
    ///
    /// A connection that was replaced by a newer one never removes its
    /// successor. Like [`Self::register`], the offline flip and the
    /// `userOffline` fan-out happen under the registry lock.
    pub async fn unregister(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        if !conns.get(identity).is_some_and(|c| c.id == connection) {
            return false;
        }
        conns.remove(identity);
        if self.presence.set_offline(identity) {
            fan_out(
                &conns,
                encode_frame(&ServerEvent::UserOffline(identity.clone())),
                None,
            );
        }
        true
    }

    /// Returns `true` if `connection` is still the live connection of
    /// `identity`.
    pub async fn is_current(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let conns = self.connections.read().await;
        conns.get(identity).is_some_and(|c| c.id == connection)
    }

    /// Returns a clone of the sender for `identity`, if connected.
    pub async fn get_sender(&self, identity: &Identity) -> Option<mpsc::UnboundedSender<WsMessage>> {
        let conns = self.connections.read().await;
        conns.get(identity).map(|c| c.sender.clone())
    }

    /// Returns `true` if `identity` holds a registered connection.
    pub async fn is_connected(&self, identity: &Identity) -> bool {
        self.connections.read().await.contains_key(identity)
    }

    /// Records which conversation `connection` has on screen.
    pub async fn set_viewing(
        &self,
        identity: &Identity,
        connection: ConnectionId,
        counterpart: Option<Identity>,
    ) {
        let mut conns = self.connections.write().await;
        if let Some(conn) = conns.get_mut(identity)
            && conn.id == connection
        {
            conn.viewing = counterpart;
        }
    }

    /// Returns `true` if `identity` is looking at its conversation with
    /// `counterpart`.
    pub async fn is_viewing(&self, identity: &Identity, counterpart: &Identity) -> bool {
        let conns = self.connections.read().await;
        conns
            .get(identity)
            .is_some_and(|c| c.viewing.as_ref() == Some(counterpart))
    }

    /// Sends an event to `identity` if it is connected.
    pub async fn send_to(&self, identity: &Identity, event: &ServerEvent) {
        if let Some(sender) = self.get_sender(identity).await {
            match encode_frame(event) {
                Ok(frame) => {
                    let _ = sender.send(frame);
                }
                Err(e) => tracing::error!(event = event.name(), error = %e, "failed to encode event"),
            }
        }
    }

    /// Send a WebSocket Close frame to all connected identities.
    ///
    /// Each writer task forwards the close frame, which lets clients
    /// detect the disconnect. Used for graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (identity, conn) in conns.iter() {
            tracing::info!(identity = %identity, "sending close frame");
            let _ = conn.sender.send(WsMessage::Close(None));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `join` event.
/// 2. Register the identity, which marks it online and broadcasts
///    `userOnline`, then answer `joined`.
/// 3. Enter the event loop.
/// 4. On disconnect, unregister, which broadcasts `userOffline`.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(identity) = wait_for_join(&mut ws_receiver, &mut ws_sender).await else {
        tracing::warn!("connection closed before join");
        return;
    };

    tracing::info!(identity = %identity, "identity joining");

    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();

    let (connection, replaced) = state.register(&identity, tx).await;
    if replaced {
        tracing::info!(identity = %identity, "replaced existing connection (duplicate join)");
    }

    if let Err(e) = send_event(&mut ws_sender, &ServerEvent::Joined(identity.clone())).await {
        tracing::error!(identity = %identity, error = %e, "failed to send joined ack");
        state.unregister(&identity, connection).await;
        return;
    }

    tracing::info!(identity = %identity, connection, "identity joined");

    let writer_identity = identity.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, WsMessage::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(identity = %writer_identity, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_identity = identity.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                WsMessage::Text(text) => {
                    if !reader_state.is_current(&reader_identity, connection).await {
                        tracing::debug!(
                            identity = %reader_identity,
                            connection,
                            "dropping frame from replaced connection"
                        );
                        continue;
                    }
                    handle_text_message(&reader_identity, connection, text.as_str(), &reader_state)
                        .await;
                }
                WsMessage::Close(_) => {
                    tracing::info!(identity = %reader_identity, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.unregister(&identity, connection).await {
        tracing::info!(identity = %identity, "identity disconnected");
    } else {
        tracing::debug!(identity = %identity, connection, "superseded connection closed");
    }
}

/// Waits for the first event on the WebSocket, expecting `join`.
///
/// Returns the identity on a valid `join`, or `None` if the connection
/// closes or anything else arrives first. Malformed frames are answered
/// with `messageError` before giving up.
async fn wait_for_join(
    receiver: &mut (impl StreamExt<Item = Result<WsMessage, axum::Error>> + Unpin),
    sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
) -> Option<Identity> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            WsMessage::Text(text) => {
                let event = match codec::decode_client(text.as_str()) {
                    Ok(ClientEvent::Join(identity)) => return Some(identity),
                    Ok(other) => {
                        tracing::warn!(event = other.name(), "expected join, got different event");
                        ErrorDescriptor::new(ErrorCode::NotJoined, "join must be the first event")
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode join");
                        ErrorDescriptor::new(ErrorCode::Malformed, e.to_string())
                    }
                };
                let _ = send_event(sender, &ServerEvent::MessageError(event)).await;
                return None;
            }
            WsMessage::Close(_) => return None,
            _ => {
                // Skip non-text frames (ping/pong) while waiting for join.
            }
        }
    }
    None
}

/// Handles one text frame from a joined connection.
async fn handle_text_message(
    identity: &Identity,
    connection: ConnectionId,
    text: &str,
    state: &Arc<ServerState>,
) {
    let event = match codec::decode_client(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(identity = %identity, error = %e, "failed to decode event");
            reject(state, identity, ErrorCode::Malformed, e.to_string()).await;
            return;
        }
    };

    tracing::debug!(identity = %identity, event = event.name(), "event received");

    match event {
        ClientEvent::Join(other) => {
            tracing::warn!(identity = %identity, other = %other, "duplicate join on joined connection");
            reject(state, identity, ErrorCode::NotJoined, "already joined").await;
        }
        ClientEvent::CheckOnlineStatus(target) => {
            let is_online = state.presence.is_online(&target);
            let answer = ServerEvent::OnlineStatus(OnlineStatus {
                user_id: target,
                is_online,
            });
            state.send_to(identity, &answer).await;
        }
        ClientEvent::SendMessage(outgoing) => {
            handle_send_message(state, identity, outgoing).await;
        }
        ClientEvent::MarkMessagesAsSeen(request) => {
            handle_mark_seen(state, identity, request).await;
        }
        ClientEvent::GetUnreadNotifications(recipient) => {
            if recipient != *identity {
                reject_mismatch(state, identity, &recipient).await;
                return;
            }
            let unread = state.notifications.unread(identity);
            tracing::debug!(identity = %identity, count = unread.len(), "sending unread snapshot");
            state
                .send_to(identity, &ServerEvent::UnreadNotifications(unread))
                .await;
        }
        ClientEvent::MarkNotificationAsRead(ReadRequest { notification_id }) => {
            let removed = state.notifications.mark_read(identity, notification_id);
            tracing::debug!(
                identity = %identity,
                notification = %notification_id,
                removed,
                "notification read"
            );
            state
                .send_to(identity, &ServerEvent::NotificationRead(notification_id))
                .await;
        }
        ClientEvent::ViewConversation(ConversationRef { conversation_id }) => {
            state
                .set_viewing(identity, connection, Some(conversation_id))
                .await;
        }
        ClientEvent::LeaveConversation => {
            state.set_viewing(identity, connection, None).await;
        }
    }
}

/// Accepts a message, appends it, and fans it out.
///
/// The accepted copy goes to both participants so the sender's view
/// converges on the server's order. A notification is created unless the
/// receiver is looking at this conversation.
async fn handle_send_message(state: &Arc<ServerState>, identity: &Identity, outgoing: OutgoingMessage) {
    if outgoing.sender_id != *identity {
        reject_mismatch(state, identity, &outgoing.sender_id).await;
        return;
    }
    if let Err(e) = validate_text(&outgoing.text, state.max_text_len) {
        let code = match e {
            ValidationError::Empty => ErrorCode::EmptyMessage,
            ValidationError::TooLarge { .. } => ErrorCode::MessageTooLarge,
        };
        tracing::warn!(identity = %identity, error = %e, "message rejected");
        reject(state, identity, code, e.to_string()).await;
        return;
    }

    let receiver = outgoing.receiver_id;
    let receiver_tx = state.get_sender(&receiver).await;
    let sender_tx = if receiver == *identity {
        None
    } else {
        state.get_sender(identity).await
    };

    let message = state
        .conversations
        .append_with(identity, &receiver, &outgoing.text, |m| {
            match encode_frame(&ServerEvent::MessageReceived(m.clone())) {
                Ok(frame) => {
                    for tx in receiver_tx.iter().chain(sender_tx.iter()) {
                        let _ = tx.send(frame.clone());
                    }
                }
                Err(e) => tracing::error!(error = %e, "failed to encode messageReceived"),
            }
        });

    tracing::debug!(
        from = %identity,
        to = %receiver,
        message = %message.id,
        client_skew_ms = (message.timestamp - outgoing.timestamp).num_milliseconds(),
        delivered = receiver_tx.is_some(),
        "message accepted"
    );

    if receiver != *identity && !state.is_viewing(&receiver, identity).await {
        let notification = state
            .notifications
            .create(&receiver, identity, &message.text);
        state
            .send_to(&receiver, &ServerEvent::NewNotification(notification))
            .await;
    }
}

/// Marks a conversation seen: flips `seen`, clears the viewer's
/// notifications for it, and tells the counterpart.
async fn handle_mark_seen(state: &Arc<ServerState>, identity: &Identity, request: SeenRequest) {
    let SeenRequest {
        conversation_id,
        user_id,
    } = request;
    if user_id != *identity {
        reject_mismatch(state, identity, &user_id).await;
        return;
    }

    let counterpart_tx = state.get_sender(&conversation_id).await;
    let receipt = encode_frame(&ServerEvent::MessagesSeen(SeenBy {
        by: identity.clone(),
    }));
    let flipped = state
        .conversations
        .mark_seen_with(identity, &conversation_id, |_| match receipt {
            Ok(frame) => {
                if let Some(tx) = &counterpart_tx {
                    let _ = tx.send(frame);
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode messagesSeen"),
        });
    let cleared = state
        .notifications
        .clear_conversation(identity, &conversation_id);
    tracing::debug!(
        identity = %identity,
        conversation = %conversation_id,
        flipped,
        cleared,
        "conversation marked seen"
    );

    state
        .send_to(
            identity,
            &ServerEvent::NotificationsCleared(ConversationRef { conversation_id }),
        )
        .await;
}

async fn reject(
    state: &Arc<ServerState>,
    identity: &Identity,
    code: ErrorCode,
    message: impl Into<String>,
) {
    let err = ServerEvent::MessageError(ErrorDescriptor::new(code, message));
    state.send_to(identity, &err).await;
}

async fn reject_mismatch(state: &Arc<ServerState>, identity: &Identity, claimed: &Identity) {
    tracing::warn!(identity = %identity, claimed = %claimed, "identity mismatch");
    reject(
        state,
        identity,
        ErrorCode::IdentityMismatch,
        format!("connection is joined as {identity}, not {claimed}"),
    )
    .await;
}

fn encode_frame(event: &ServerEvent) -> Result<WsMessage, codec::CodecError> {
    codec::encode_server(event).map(|text| WsMessage::Text(text.into()))
}

/// Hands `frame` to every registered connection except `except`'s.
fn fan_out(
    conns: &HashMap<Identity, Connection>,
    frame: Result<WsMessage, codec::CodecError>,
    except: Option<&Identity>,
) {
    let frame = match frame {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode broadcast");
            return;
        }
    };
    for (identity, conn) in conns {
        if Some(identity) != except {
            let _ = conn.sender.send(frame.clone());
        }
    }
}

/// Encodes and sends a server event directly on a WebSocket sender.
async fn send_event(
    ws_sender: &mut (impl SinkExt<WsMessage, Error = axum::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), String> {
    let frame = encode_frame(event).map_err(|e| e.to_string())?;
    ws_sender
        .send(frame)
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Builds the HTTP router: `/ws`, `/messages/{counterpart_id}`, `/health`.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route(
            "/messages/{counterpart_id}",
            axum::routing::get(http::get_messages),
        )
        .route("/health", axum::routing::get(http::health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
