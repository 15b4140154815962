// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Two client sessions talking through an in-process server.
//!
//! Exercises the whole client stack: managed connection, history over
//! REST, and the session dispatcher feeding the three client stores.

use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;
use wingchat::connection::{self, ConnectionConfig, ConnectionEvent, ConnectionHandle};
use wingchat::conversation::{ConversationStore, DeliveryStatus};
use wingchat::history::HistoryClient;
use wingchat::session::{MessagingSession, SessionConfig, SessionUpdate};
use wingchat_proto::Identity;
use wingchat_proto::presence::PresenceState;

struct Client {
    session: MessagingSession<ConnectionHandle>,
    events: mpsc::Receiver<ConnectionEvent>,
    history: HistoryClient,
    handle: ConnectionHandle,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr, id: &str) -> Self {
        let identity = Identity::new(id);
        let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
        let (handle, events) = connection::spawn(ConnectionConfig::new(url, identity.clone()));
        let history = HistoryClient::new(
            Url::parse(&format!("http://{addr}/")).unwrap(),
            identity.clone(),
            Duration::from_secs(5),
        )
        .unwrap();
        let session = MessagingSession::new(identity, handle.clone(), SessionConfig::default());
        let mut client = Self {
            session,
            events,
            history,
            handle,
        };
        client.wait_connected().await;
        client
    }

    async fn wait_connected(&mut self) {
        loop {
            match self.next_event("connected").await {
                ConnectionEvent::Connected => {
                    self.session.on_connected();
                    break;
                }
                ConnectionEvent::Event(event) => {
                    self.session.handle(event);
                }
                other => panic!("unexpected {other:?} while connecting"),
            }
        }
        self.until("unread snapshot", |u| {
            matches!(u, SessionUpdate::NotificationsChanged { .. })
        })
        .await;
    }

    async fn next_event(&mut self, description: &str) -> ConnectionEvent {
        tokio::time::timeout(Duration::from_secs(10), self.events.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
            .unwrap_or_else(|| panic!("connection stopped while waiting for {description}"))
    }

    /// Drives the session until an update matches `pred`.
    async fn until<F>(&mut self, description: &str, pred: F) -> SessionUpdate
    where
        F: Fn(&SessionUpdate) -> bool,
    {
        loop {
            match self.next_event(description).await {
                ConnectionEvent::Connected => self.session.on_connected(),
                ConnectionEvent::Event(event) => {
                    if let Some(update) = self.session.handle(event)
                        && pred(&update)
                    {
                        return update;
                    }
                }
                other => panic!("unexpected {other:?} while waiting for {description}"),
            }
        }
    }

    async fn open(&mut self, counterpart: &str) {
        let counterpart = Identity::new(counterpart);
        let log = self.history.load(&counterpart).await;
        self.session.open_conversation(counterpart.clone(), log);
        // The presence answer follows viewConversation, so once it is in
        // the server has recorded the view.
        self.until("presence answer", |u| {
            matches!(u, SessionUpdate::Presence { identity, .. } if *identity == counterpart)
        })
        .await;
    }
}

async fn start() -> std::net::SocketAddr {
    let (addr, _handle) = wingchat_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start server");
    addr
}

#[tokio::test]
async fn open_conversation_chat_and_seen_receipt() {
    let addr = start().await;
    let mut alice = Client::connect(addr, "alice").await;
    let mut bob = Client::connect(addr, "bob").await;

    alice.open("bob").await;
    bob.open("alice").await;
    assert_eq!(
        bob.session.presence().status(&Identity::new("alice")),
        PresenceState::Online
    );

    alice.session.send("hello", chrono::Utc::now()).unwrap();
    bob.until("hello at bob", |u| {
        matches!(u, SessionUpdate::MessageAppended(m) if m.text == "hello")
    })
    .await;
    alice
        .until("own echo", |u| matches!(u, SessionUpdate::MessageAppended(_)))
        .await;
    let seen = alice
        .until("seen receipt", |u| matches!(u, SessionUpdate::MessagesSeen { .. }))
        .await;
    assert_eq!(
        seen,
        SessionUpdate::MessagesSeen {
            by: Identity::new("bob"),
            flipped: 1,
        }
    );

    let mine = &alice.session.conversation().messages()[0];
    assert_eq!(
        ConversationStore::delivery_status(mine),
        DeliveryStatus::Seen
    );
    // Bob was viewing, so no notification was created.
    assert_eq!(bob.session.notifications().unread_count(), 0);

    alice.handle.teardown().await;
    bob.handle.teardown().await;
}

#[tokio::test]
async fn notification_read_round_trip() {
    let addr = start().await;
    let mut alice = Client::connect(addr, "alice").await;
    let mut bob = Client::connect(addr, "bob").await;

    alice.open("bob").await;
    alice.session.send("boarding soon", chrono::Utc::now()).unwrap();

    let SessionUpdate::NotificationAdded(notification) = bob
        .until("notification", |u| matches!(u, SessionUpdate::NotificationAdded(_)))
        .await
    else {
        unreachable!()
    };
    assert_eq!(notification.conversation_id, Identity::new("alice"));
    assert_eq!(bob.session.notifications().unread_count(), 1);

    assert!(
        bob.session
            .mark_notification_read(notification.id, tokio::time::Instant::now())
    );
    assert_eq!(bob.session.notifications().unread_count(), 0);
    bob.until("read echo", |u| {
        matches!(u, SessionUpdate::NotificationsChanged { unread: 0 })
    })
    .await;
    assert!(!bob.session.notifications().is_pending(notification.id));
}

#[tokio::test]
async fn opening_loads_history_and_clears_notifications() {
    let addr = start().await;
    let mut alice = Client::connect(addr, "alice").await;
    alice.open("bob").await;
    alice.session.send("first", chrono::Utc::now()).unwrap();
    alice.session.send("second", chrono::Utc::now()).unwrap();
    for _ in 0..2 {
        alice
            .until("own echo", |u| matches!(u, SessionUpdate::MessageAppended(_)))
            .await;
    }

    let mut bob = Client::connect(addr, "bob").await;
    // The unread snapshot requested on connect carries both notifications.
    assert_eq!(bob.session.notifications().unread_count(), 2);

    let log = bob.history.load(&Identity::new("alice")).await;
    bob.session.open_conversation(Identity::new("alice"), log);
    let texts: Vec<_> = bob
        .session
        .conversation()
        .messages()
        .iter()
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(texts, ["first", "second"]);

    bob.until("cleared", |u| {
        matches!(u, SessionUpdate::NotificationsChanged { unread: 0 })
    })
    .await;
    alice
        .until("seen receipt", |u| {
            matches!(u, SessionUpdate::MessagesSeen { flipped: 2, .. })
        })
        .await;
}
