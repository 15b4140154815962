//! Real-time connection manager.
//!
//! A supervisor task owns the WebSocket. It connects, emits `join`, waits
//! for `joined`, then pumps frames in both directions. When the transport
//! drops it moves to [`ConnectionState::Reconnecting`] and retries with
//! exponential backoff until it either joins again or exhausts
//! [`ReconnectConfig::max_attempts`].
//!
//! ```text
//! caller ── ConnectionHandle::emit ──▶ supervisor ──▶ WebSocket
//!        ◀── ConnectionEvent ──────────            ◀──
//! ```
//!
//! Outbound events emitted while the socket is down are kept and flushed
//! after the next successful join.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use wingchat_proto::Identity;
use wingchat_proto::codec::{self, CodecError};
use wingchat_proto::event::{ClientEvent, ServerEvent};

use crate::config::ReconnectConfig;

/// Type alias for the write half of a WebSocket connection.
type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the read half of a WebSocket connection.
type WsStream =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Observable state of the real-time channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected and not trying (initial, torn down, or gave up).
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Joined and pumping frames.
    Connected,
    /// Transport lost; waiting for or performing retry `attempt`.
    Reconnecting {
        /// 1-based retry counter since the last successful join.
        attempt: u32,
    },
}

impl ConnectionState {
    /// Returns `true` while joined.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Events delivered from the supervisor to the owner of the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A join completed. Emitted on the first join and after every
    /// reconnect; the receiver should resubscribe.
    Connected,
    /// A server event arrived.
    Event(ServerEvent),
    /// The transport dropped; a reconnect is about to be attempted.
    Disconnected {
        /// Human-readable cause.
        reason: String,
    },
    /// Retries were exhausted. The supervisor has stopped.
    ReconnectFailed {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },
}

/// Errors raised by the connection layer.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Connecting or joining did not finish in time.
    #[error("timed out")]
    Timeout,
    /// The WebSocket could not be established.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The server did not acknowledge the join.
    #[error("join failed: {0}")]
    Join(String),
    /// The socket closed, or the supervisor has stopped.
    #[error("connection closed")]
    Closed,
    /// Too many outbound events are queued.
    #[error("outbound queue is full")]
    QueueFull,
    /// An outbound event could not be encoded.
    #[error(transparent)]
    Encode(#[from] CodecError),
}

/// Settings for one managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL (`ws://` or `wss://`).
    pub url: Url,
    /// Identity to join as.
    pub identity: Identity,
    /// Timeout for the WebSocket handshake.
    pub connect_timeout: Duration,
    /// Timeout for the `joined` acknowledgement.
    pub join_timeout: Duration,
    /// Capacity of the command and event channels, and of the offline
    /// outbound buffer.
    pub channel_capacity: usize,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,
}

impl ConnectionConfig {
    /// Creates a config with default timeouts and backoff.
    #[must_use]
    pub fn new(url: Url, identity: Identity) -> Self {
        Self {
            url,
            identity,
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Emit(ClientEvent),
    Teardown,
}

/// Cloneable handle to a running supervisor.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionHandle {
    /// Queues an outbound event.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::QueueFull`] if the command channel is
    /// full, or [`ConnectionError::Closed`] if the supervisor has stopped.
    pub fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        self.commands
            .try_send(Command::Emit(event))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ConnectionError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ConnectionError::Closed,
            })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Closes the socket and stops the supervisor. Events arriving
    /// afterwards are dropped.
    pub async fn teardown(&self) {
        let _ = self.commands.send(Command::Teardown).await;
    }
}

/// Exponential backoff with optional jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff with no failed attempts.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Upper bound of the delay before retry `attempt` (1-based), without
    /// jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .config
            .multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.config
            .initial_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Records a failed attempt and returns the delay before the next
    /// one, or `None` when `max_attempts` is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }
        self.attempts += 1;
        let delay = self.delay_for(self.attempts);
        Some(if self.config.jitter {
            jittered(delay)
        } else {
            delay
        })
    }

    /// Consecutive failed attempts so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Clears the failure counter after a successful join.
    pub const fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Picks a delay uniformly from the upper half of `delay`.
fn jittered(delay: Duration) -> Duration {
    let half = delay / 2;
    let spread = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
    half + Duration::from_millis(rand::rng().random_range(0..=spread))
}

/// Spawns the supervisor task and returns its handle and event stream.
///
/// The first connection attempt starts immediately.
#[must_use]
pub fn spawn(config: ConnectionConfig) -> (ConnectionHandle, mpsc::Receiver<ConnectionEvent>) {
    let capacity = config.channel_capacity.max(1);
    let (cmd_tx, cmd_rx) = mpsc::channel(capacity);
    let (evt_tx, evt_rx) = mpsc::channel(capacity);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

    tokio::spawn(supervise(config, cmd_rx, evt_tx, state_tx));

    (
        ConnectionHandle {
            commands: cmd_tx,
            state: state_rx,
        },
        evt_rx,
    )
}

/// Why [`pump`] returned.
enum PumpExit {
    /// Teardown was requested, or the owner went away.
    Stopped,
    /// The transport dropped.
    Lost(String),
}

/// Outbound events waiting for a live socket.
struct Outbox {
    queue: VecDeque<ClientEvent>,
    capacity: usize,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn push(&mut self, event: ClientEvent) {
        if self.queue.len() >= self.capacity
            && let Some(dropped) = self.queue.pop_front()
        {
            tracing::warn!(event = dropped.name(), "offline queue full, dropping oldest");
        }
        self.queue.push_back(event);
    }
}

async fn supervise(
    config: ConnectionConfig,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ConnectionEvent>,
    state: watch::Sender<ConnectionState>,
) {
    let mut backoff = Backoff::new(config.reconnect.clone());
    let mut outbox = Outbox::new(config.channel_capacity);
    state.send_replace(ConnectionState::Connecting);

    loop {
        match establish(&config).await {
            Ok((sink, stream)) => {
                backoff.reset();
                state.send_replace(ConnectionState::Connected);
                tracing::info!(identity = %config.identity, url = %config.url, "connected");
                if events.send(ConnectionEvent::Connected).await.is_err() {
                    break;
                }
                match pump(sink, stream, &mut commands, &events, &mut outbox).await {
                    PumpExit::Stopped => break,
                    PumpExit::Lost(reason) => {
                        tracing::warn!(identity = %config.identity, reason = %reason, "connection lost");
                        if events
                            .send(ConnectionEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    identity = %config.identity,
                    url = %config.url,
                    attempt = backoff.attempts(),
                    error = %e,
                    "connection attempt failed"
                );
            }
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(attempts = backoff.attempts(), "giving up reconnecting");
            state.send_replace(ConnectionState::Disconnected);
            let _ = events
                .send(ConnectionEvent::ReconnectFailed {
                    attempts: backoff.attempts(),
                })
                .await;
            return;
        };
        state.send_replace(ConnectionState::Reconnecting {
            attempt: backoff.attempts(),
        });
        tracing::debug!(delay_ms = delay.as_millis(), attempt = backoff.attempts(), "backing off");

        if !wait_buffering(delay, &mut commands, &mut outbox).await {
            break;
        }
    }

    state.send_replace(ConnectionState::Disconnected);
    tracing::info!(identity = %config.identity, "connection supervisor stopped");
}

/// Sleeps for `delay` while buffering emitted events. Returns `false` if
/// teardown was requested.
async fn wait_buffering(
    delay: Duration,
    commands: &mut mpsc::Receiver<Command>,
    outbox: &mut Outbox,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = commands.recv() => match cmd {
                Some(Command::Emit(event)) => outbox.push(event),
                Some(Command::Teardown) | None => return false,
            },
        }
    }
}

/// Connects, joins, and waits for the acknowledgement.
async fn establish(config: &ConnectionConfig) -> Result<(WsSink, WsStream), ConnectionError> {
    let (ws, _response) = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| ConnectionError::Timeout)?
        .map_err(|e| ConnectionError::Connect(e.to_string()))?;

    let (mut sink, mut stream) = ws.split();
    send_event(&mut sink, &ClientEvent::Join(config.identity.clone())).await?;

    let deadline = tokio::time::Instant::now() + config.join_timeout;
    loop {
        let frame = tokio::time::timeout_at(deadline, stream.next())
            .await
            .map_err(|_| ConnectionError::Timeout)?;
        match frame {
            Some(Ok(Message::Text(text))) => match codec::decode_server(text.as_str()) {
                Ok(ServerEvent::Joined(identity)) if identity == config.identity => {
                    return Ok((sink, stream));
                }
                Ok(ServerEvent::MessageError(err)) => {
                    return Err(ConnectionError::Join(err.message));
                }
                Ok(other) => {
                    tracing::debug!(event = other.name(), "ignoring event before joined");
                }
                Err(e) => return Err(ConnectionError::Join(e.to_string())),
            },
            Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectionError::Connect(e.to_string())),
        }
    }
}

/// Pumps frames until the transport drops or teardown is requested.
async fn pump(
    mut sink: WsSink,
    mut stream: WsStream,
    commands: &mut mpsc::Receiver<Command>,
    events: &mpsc::Sender<ConnectionEvent>,
    outbox: &mut Outbox,
) -> PumpExit {
    while let Some(event) = outbox.queue.pop_front() {
        if let Err(e) = send_event(&mut sink, &event).await {
            outbox.queue.push_front(event);
            return PumpExit::Lost(e.to_string());
        }
    }

    loop {
        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(Command::Emit(event)) => {
                    if let Err(e) = send_event(&mut sink, &event).await {
                        outbox.push(event);
                        return PumpExit::Lost(e.to_string());
                    }
                }
                Some(Command::Teardown) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpExit::Stopped;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match codec::decode_server(text.as_str()) {
                    Ok(event) => {
                        if events.send(ConnectionEvent::Event(event)).await.is_err() {
                            let _ = sink.send(Message::Close(None)).await;
                            return PumpExit::Stopped;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "malformed server frame, skipping");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    return PumpExit::Lost("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
            },
        }
    }
}

async fn send_event(sink: &mut WsSink, event: &ClientEvent) -> Result<(), ConnectionError> {
    let text = codec::encode_client(event)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectionError::Connect(e.to_string()))
}
