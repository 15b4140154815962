// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::match_same_arms,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! End-to-end messaging over the real-time channel.
//!
//! Each test starts an in-process server on an OS-assigned port and talks
//! to it with raw `tokio-tungstenite` clients.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite;
use wingchat_proto::Identity;
use wingchat_proto::codec;
use wingchat_proto::event::{
    ClientEvent, ConversationRef, ReadRequest, SeenBy, SeenRequest, ServerEvent,
};
use wingchat_proto::message::{Message, OutgoingMessage};
use wingchat_proto::notification::Notification;
use wingchat_server::server::{ServerState, start_server_with_state};

type Ws =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// =============================================================================
// Helpers
// =============================================================================

async fn start() -> (std::net::SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (addr, state)
}

async fn send(ws: &mut Ws, event: &ClientEvent) {
    let text = codec::encode_client(event).unwrap();
    ws.send(tungstenite::Message::Text(text.into())).await.unwrap();
}

/// Next non-presence event.
async fn recv(ws: &mut Ws) -> ServerEvent {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("websocket error");
        if let tungstenite::Message::Text(text) = frame {
            match codec::decode_server(text.as_str()).unwrap() {
                ServerEvent::UserOnline(_) | ServerEvent::UserOffline(_) => {}
                event => return event,
            }
        }
    }
}

async fn join(addr: std::net::SocketAddr, id: &str) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    send(&mut ws, &ClientEvent::Join(Identity::new(id))).await;
    assert_eq!(recv(&mut ws).await, ServerEvent::Joined(Identity::new(id)));
    ws
}

fn message(from: &str, to: &str, text: &str) -> ClientEvent {
    ClientEvent::SendMessage(OutgoingMessage {
        sender_id: Identity::new(from),
        receiver_id: Identity::new(to),
        text: text.to_string(),
        timestamp: chrono::Utc::now(),
    })
}

fn seen(conversation: &str, by: &str) -> ClientEvent {
    ClientEvent::MarkMessagesAsSeen(SeenRequest {
        conversation_id: Identity::new(conversation),
        user_id: Identity::new(by),
    })
}

fn expect_message(event: ServerEvent) -> Message {
    match event {
        ServerEvent::MessageReceived(m) => m,
        other => panic!("expected messageReceived, got {other:?}"),
    }
}

fn expect_notification(event: ServerEvent) -> Notification {
    match event {
        ServerEvent::NewNotification(n) => n,
        other => panic!("expected newNotification, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn hello_reaches_both_and_notifies_receiver() {
    let (addr, state) = start().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    send(&mut alice, &message("alice", "bob", "hello")).await;

    let at_bob = expect_message(recv(&mut bob).await);
    let at_alice = expect_message(recv(&mut alice).await);
    assert_eq!(at_bob, at_alice);
    assert_eq!(at_bob.sender, Identity::new("alice"));
    assert!(!at_bob.seen);

    let notification = expect_notification(recv(&mut bob).await);
    assert_eq!(notification.conversation_id, Identity::new("alice"));
    assert_eq!(notification.content, "hello");

    let history = state
        .conversations
        .history(&Identity::new("bob"), &Identity::new("alice"));
    assert_eq!(history, [at_bob]);
}

#[tokio::test]
async fn marking_seen_clears_and_tells_sender() {
    let (addr, state) = start().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    send(&mut alice, &message("alice", "bob", "one")).await;
    send(&mut alice, &message("alice", "bob", "two")).await;
    for _ in 0..2 {
        expect_message(recv(&mut alice).await);
    }
    // Bob: message, notification, message, notification.
    for _ in 0..4 {
        recv(&mut bob).await;
    }
    assert_eq!(state.notifications.unread_count(&Identity::new("bob")), 2);

    send(&mut bob, &seen("alice", "bob")).await;
    assert_eq!(
        recv(&mut bob).await,
        ServerEvent::NotificationsCleared(ConversationRef {
            conversation_id: Identity::new("alice"),
        })
    );
    assert_eq!(
        recv(&mut alice).await,
        ServerEvent::MessagesSeen(SeenBy {
            by: Identity::new("bob"),
        })
    );

    let history = state
        .conversations
        .history(&Identity::new("alice"), &Identity::new("bob"));
    assert!(history.iter().all(|m| m.seen));
    assert_eq!(state.notifications.unread_count(&Identity::new("bob")), 0);

    // Marking again still answers both sides.
    send(&mut bob, &seen("alice", "bob")).await;
    assert!(matches!(recv(&mut bob).await, ServerEvent::NotificationsCleared(_)));
    assert!(matches!(recv(&mut alice).await, ServerEvent::MessagesSeen(_)));
}

#[tokio::test]
async fn both_participants_see_the_same_order() {
    let (addr, _state) = start().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    // Both view the conversation so no notifications interleave.
    for (ws, other) in [(&mut alice, "bob"), (&mut bob, "alice")] {
        send(
            ws,
            &ClientEvent::ViewConversation(ConversationRef {
                conversation_id: Identity::new(other),
            }),
        )
        .await;
    }
    // Round-trip a query on each so the views are recorded.
    for ws in [&mut alice, &mut bob] {
        send(ws, &ClientEvent::CheckOnlineStatus(Identity::new("alice"))).await;
        assert!(matches!(recv(ws).await, ServerEvent::OnlineStatus(_)));
    }

    for i in 0..10 {
        send(&mut alice, &message("alice", "bob", &format!("a{i}"))).await;
        send(&mut bob, &message("bob", "alice", &format!("b{i}"))).await;
    }

    let mut at_alice = Vec::new();
    let mut at_bob = Vec::new();
    for _ in 0..20 {
        at_alice.push(expect_message(recv(&mut alice).await));
        at_bob.push(expect_message(recv(&mut bob).await));
    }
    assert_eq!(at_alice, at_bob);
    assert!(at_alice.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn offline_receiver_gets_history_and_unread_on_join() {
    let (addr, _state) = start().await;
    let mut alice = join(addr, "alice").await;

    send(&mut alice, &message("alice", "bob", "are you there?")).await;
    let sent = expect_message(recv(&mut alice).await);

    let mut bob = join(addr, "bob").await;
    send(&mut bob, &ClientEvent::GetUnreadNotifications(Identity::new("bob"))).await;
    match recv(&mut bob).await {
        ServerEvent::UnreadNotifications(list) => {
            assert_eq!(list.len(), 1);
            assert_eq!(list[0].conversation_id, Identity::new("alice"));
            assert_eq!(list[0].content, sent.text);
        }
        other => panic!("expected unreadNotifications, got {other:?}"),
    }
}

#[tokio::test]
async fn notification_read_is_echoed_every_time() {
    let (addr, state) = start().await;
    let mut alice = join(addr, "alice").await;
    let mut bob = join(addr, "bob").await;

    send(&mut alice, &message("alice", "bob", "ping")).await;
    expect_message(recv(&mut bob).await);
    let notification = expect_notification(recv(&mut bob).await);

    let read = ClientEvent::MarkNotificationAsRead(ReadRequest {
        notification_id: notification.id,
    });
    for _ in 0..2 {
        send(&mut bob, &read).await;
        assert_eq!(
            recv(&mut bob).await,
            ServerEvent::NotificationRead(notification.id)
        );
    }
    assert_eq!(state.notifications.unread_count(&Identity::new("bob")), 0);
}

#[tokio::test]
async fn unread_snapshot_for_another_identity_is_refused() {
    let (addr, _state) = start().await;
    let mut alice = join(addr, "alice").await;

    send(&mut alice, &ClientEvent::GetUnreadNotifications(Identity::new("bob"))).await;
    match recv(&mut alice).await {
        ServerEvent::MessageError(err) => {
            assert_eq!(err.code, wingchat_proto::event::ErrorCode::IdentityMismatch);
        }
        other => panic!("expected messageError, got {other:?}"),
    }
}
