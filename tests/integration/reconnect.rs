// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Automatic reconnection of the managed connection.
//!
//! ## Disconnect simulation
//!
//! Dropping the server's `JoinHandle` does not close established
//! WebSockets, so the client connects through a **TCP proxy**. Killing the
//! proxy aborts every proxied connection task, which closes both ends and
//! makes the client's WebSocket layer see a disconnect. A new proxy on the
//! same port lets it reconnect.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;
use wingchat::config::ReconnectConfig;
use wingchat::connection::{self, ConnectionConfig, ConnectionEvent, ConnectionState};
use wingchat::session::{MessagingSession, SessionConfig};
use wingchat_proto::Identity;
use wingchat_proto::event::{ClientEvent, ServerEvent};
use wingchat_proto::message::OutgoingMessage;
use wingchat_server::server::{ServerState, start_server_with_state};

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// Forwards TCP between a client-facing port and the real server.
struct TcpProxy {
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    /// Binds `127.0.0.1:{port}` and forwards to `backend`. Retries the bind
    /// briefly so a port released by a killed proxy can be reused.
    async fn new(port: u16, backend: std::net::SocketAddr) -> Self {
        let mut attempts = 0;
        let listener = loop {
            match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
                Ok(listener) => break listener,
                Err(e) if attempts < 50 => {
                    attempts += 1;
                    tracing::debug!(error = %e, "proxy bind retry");
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
                Err(e) => panic!("proxy: failed to bind port {port}: {e}"),
            }
        };

        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                let conn = tokio::spawn(async move {
                    let Ok(mut server) = tokio::net::TcpStream::connect(backend).await else {
                        return;
                    };
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut server).await;
                });
                tracked.lock().push(conn);
            }
        });

        Self {
            accept_handle,
            conn_handles,
        }
    }

    /// Severs every proxied connection and stops accepting.
    fn kill(self) {
        self.accept_handle.abort();
        for handle in self.conn_handles.lock().iter() {
            handle.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start() -> (std::net::SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (addr, state)
}

fn fast_config(port: u16, id: &str, max_attempts: Option<u32>) -> ConnectionConfig {
    let url = Url::parse(&format!("ws://127.0.0.1:{port}/ws")).unwrap();
    let mut config = ConnectionConfig::new(url, Identity::new(id));
    config.connect_timeout = Duration::from_secs(2);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(400),
        multiplier: 2,
        max_attempts,
        jitter: false,
    };
    config
}

/// Waits for an event matching `pred`, skipping others.
async fn wait_for<F>(
    rx: &mut mpsc::Receiver<ConnectionEvent>,
    description: &str,
    pred: F,
) -> ConnectionEvent
where
    F: Fn(&ConnectionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("channel closed while waiting for {description}"),
            Err(_) => panic!("timeout waiting for {description}"),
        }
    }
}

async fn wait_connected(rx: &mut mpsc::Receiver<ConnectionEvent>) {
    wait_for(rx, "Connected", |e| matches!(e, ConnectionEvent::Connected)).await;
}

async fn wait_disconnected(rx: &mut mpsc::Receiver<ConnectionEvent>) {
    wait_for(rx, "Disconnected", |e| {
        matches!(e, ConnectionEvent::Disconnected { .. })
    })
    .await;
}

fn outgoing(from: &str, to: &str, text: &str) -> ClientEvent {
    ClientEvent::SendMessage(OutgoingMessage {
        sender_id: Identity::new(from),
        receiver_id: Identity::new(to),
        text: text.to_string(),
        timestamp: chrono::Utc::now(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn reconnects_after_transport_loss() {
    let (addr, state) = start().await;
    let port = free_port().await;
    let proxy = TcpProxy::new(port, addr).await;

    let (handle, mut events) = connection::spawn(fast_config(port, "alice", None));
    wait_connected(&mut events).await;
    assert!(state.presence.is_online(&Identity::new("alice")));

    proxy.kill();
    wait_disconnected(&mut events).await;
    let mut watch = handle.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|s| matches!(s, ConnectionState::Reconnecting { .. })),
    )
    .await
    .unwrap()
    .unwrap();

    let _proxy = TcpProxy::new(port, addr).await;
    wait_connected(&mut events).await;
    assert_eq!(handle.state(), ConnectionState::Connected);

    // Messaging resumes on the new socket.
    handle
        .emit(ClientEvent::CheckOnlineStatus(Identity::new("alice")))
        .unwrap();
    let answer = wait_for(&mut events, "onlineStatus", |e| {
        matches!(e, ConnectionEvent::Event(ServerEvent::OnlineStatus(_)))
    })
    .await;
    assert!(matches!(
        answer,
        ConnectionEvent::Event(ServerEvent::OnlineStatus(s)) if s.is_online
    ));
}

#[tokio::test]
async fn events_emitted_while_down_are_flushed_after_join() {
    let (addr, state) = start().await;
    let port = free_port().await;
    let proxy = TcpProxy::new(port, addr).await;

    let (handle, mut events) = connection::spawn(fast_config(port, "alice", None));
    wait_connected(&mut events).await;

    proxy.kill();
    wait_disconnected(&mut events).await;

    for i in 1..=3 {
        handle
            .emit(outgoing("alice", "bob", &format!("queued {i}")))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        state
            .conversations
            .history(&Identity::new("alice"), &Identity::new("bob"))
            .is_empty()
    );

    let _proxy = TcpProxy::new(port, addr).await;
    wait_connected(&mut events).await;

    for _ in 0..3 {
        wait_for(&mut events, "own echo", |e| {
            matches!(e, ConnectionEvent::Event(ServerEvent::MessageReceived(_)))
        })
        .await;
    }
    let texts: Vec<_> = state
        .conversations
        .history(&Identity::new("alice"), &Identity::new("bob"))
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, ["queued 1", "queued 2", "queued 3"]);
}

#[tokio::test]
async fn session_resubscribes_after_reconnect() {
    let (addr, state) = start().await;
    let port = free_port().await;
    let proxy = TcpProxy::new(port, addr).await;

    let (handle, mut events) = connection::spawn(fast_config(port, "bob", None));
    let mut session =
        MessagingSession::new(Identity::new("bob"), handle.clone(), SessionConfig::default());
    wait_connected(&mut events).await;
    session.on_connected();
    session.open_conversation(Identity::new("alice"), Vec::new());
    wait_for(&mut events, "presence answer", |e| {
        matches!(e, ConnectionEvent::Event(ServerEvent::OnlineStatus(_)))
    })
    .await;
    assert!(state.is_viewing(&Identity::new("bob"), &Identity::new("alice")).await);

    proxy.kill();
    wait_disconnected(&mut events).await;
    let _proxy = TcpProxy::new(port, addr).await;
    wait_connected(&mut events).await;
    assert!(!state.is_viewing(&Identity::new("bob"), &Identity::new("alice")).await);

    session.on_connected();
    // notificationsCleared answers the markMessagesAsSeen sent after
    // viewConversation.
    wait_for(&mut events, "notificationsCleared", |e| {
        matches!(e, ConnectionEvent::Event(ServerEvent::NotificationsCleared(_)))
    })
    .await;
    assert!(state.is_viewing(&Identity::new("bob"), &Identity::new("alice")).await);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (addr, _state) = start().await;
    let port = free_port().await;
    let proxy = TcpProxy::new(port, addr).await;

    let (handle, mut events) = connection::spawn(fast_config(port, "alice", Some(3)));
    wait_connected(&mut events).await;

    proxy.kill();
    let failed = wait_for(&mut events, "ReconnectFailed", |e| {
        matches!(e, ConnectionEvent::ReconnectFailed { .. })
    })
    .await;
    assert_eq!(failed, ConnectionEvent::ReconnectFailed { attempts: 3 });
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn teardown_during_backoff_stops_supervisor() {
    let (addr, _state) = start().await;
    let port = free_port().await;
    let proxy = TcpProxy::new(port, addr).await;

    let mut config = fast_config(port, "alice", None);
    config.reconnect.initial_delay = Duration::from_secs(30);
    config.reconnect.max_delay = Duration::from_secs(30);
    let (handle, mut events) = connection::spawn(config);
    wait_connected(&mut events).await;

    proxy.kill();
    wait_disconnected(&mut events).await;

    handle.teardown().await;
    let closed = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("supervisor did not stop");
    assert!(closed.is_none());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}
