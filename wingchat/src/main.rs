//! `Wingchat` line-mode client.
//!
//! Reads lines from stdin: plain text is sent to the open conversation,
//! lines starting with `/` are commands. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/wingchat/config.toml`).
//!
//! ```bash
//! cargo run --bin wingchat -- --server-url ws://127.0.0.1:9000/ws \
//!     --identity alice --peer airline-desk
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing_appender::non_blocking::WorkerGuard;
use wingchat::config::{CliArgs, ClientConfig};
use wingchat::connection::{self, ConnectionEvent, ConnectionHandle};
use wingchat::conversation::ConversationStore;
use wingchat::history::HistoryClient;
use wingchat::session::{MessagingSession, SessionUpdate};
use wingchat_proto::Identity;

const HELP: &str = "commands: /open <id>  /close  /who <id>  /unread  /read <n>  /quit";

type Session = MessagingSession<ConnectionHandle>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "client failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to a file when configured, otherwise to stderr.
///
/// The returned [`WorkerGuard`] must be held until shutdown so buffered
/// file output is flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some(path) = file_path else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        return None;
    };

    let log_dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name()?;
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let connection_config = config.to_connection_config()?;
    let identity = connection_config.identity.clone();
    let history = HistoryClient::new(
        config.history_base_url()?,
        identity.clone(),
        config.connect_timeout,
    )?;

    tracing::info!(identity = %identity, url = %connection_config.url, "wingchat starting");

    let (handle, mut events) = connection::spawn(connection_config);
    let mut session = MessagingSession::new(identity, handle.clone(), config.session_config());

    if let Some(peer) = config.peer.as_deref() {
        open(&mut session, &history, Identity::new(peer)).await;
    }
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut session, &history, line.trim()).await {
                    break;
                }
            }
            event = events.recv() => match event {
                Some(ConnectionEvent::Connected) => {
                    println!("* connected");
                    session.on_connected();
                }
                Some(ConnectionEvent::Event(event)) => {
                    if let Some(update) = session.handle(event) {
                        render(&update);
                    }
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    println!("* disconnected ({reason}), reconnecting");
                }
                Some(ConnectionEvent::ReconnectFailed { attempts }) => {
                    println!("* could not reconnect after {attempts} attempts");
                    break;
                }
                None => break,
            },
            _ = tick.tick() => {
                for id in session.tick(Instant::now()) {
                    println!("* notification {id} could not be marked read");
                }
            }
        }
    }

    session.close_conversation();
    handle.teardown().await;
    tracing::info!("wingchat exiting");
    Ok(())
}

/// Handles one input line. Returns `false` to quit.
async fn handle_line(session: &mut Session, history: &HistoryClient, line: &str) -> bool {
    let (command, arg) = line.split_once(' ').map_or((line, ""), |(c, a)| (c, a.trim()));
    match command {
        "" => {}
        "/quit" => return false,
        "/open" if !arg.is_empty() => open(session, history, Identity::new(arg)).await,
        "/close" => session.close_conversation(),
        "/who" if !arg.is_empty() => session.watch(Identity::new(arg)),
        "/unread" => {
            for (index, n) in session.notifications().visible().enumerate() {
                println!("  [{index}] {}: {}", n.conversation_id, n.content);
            }
        }
        "/read" => {
            let id = arg
                .parse::<usize>()
                .ok()
                .and_then(|i| session.notifications().visible().nth(i).map(|n| n.id));
            match id {
                Some(id) => {
                    session.mark_notification_read(id, Instant::now());
                }
                None => println!("* no such notification"),
            }
        }
        _ if command.starts_with('/') => println!("{HELP}"),
        _ => {
            if let Err(e) = session.send(line, chrono::Utc::now()) {
                println!("* not sent: {e}");
            }
        }
    }
    true
}

async fn open(session: &mut Session, history: &HistoryClient, counterpart: Identity) {
    let log = history.load(&counterpart).await;
    session.open_conversation(counterpart.clone(), log);
    println!("* conversation with {counterpart}");
    for (day, messages) in session.conversation().grouped_by_date() {
        println!("-- {day} --");
        for message in messages {
            println!(
                "  {} {}: {} [{:?}]",
                message.timestamp.format("%H:%M"),
                message.sender,
                message.text,
                ConversationStore::delivery_status(message)
            );
        }
    }
}

fn render(update: &SessionUpdate) {
    match update {
        SessionUpdate::MessageAppended(message) => {
            println!(
                "  {} {}: {}",
                message.timestamp.format("%H:%M"),
                message.sender,
                message.text
            );
        }
        SessionUpdate::MessagesSeen { by, flipped } => {
            println!("* {by} saw {flipped} message(s)");
        }
        SessionUpdate::Presence { identity, state } => println!("* {identity} is {state}"),
        SessionUpdate::NotificationAdded(n) => {
            println!("* new message from {}: {}", n.conversation_id, n.content);
        }
        SessionUpdate::NotificationsChanged { unread } => println!("* {unread} unread"),
        SessionUpdate::Error(err) => println!("* error: {}", err.message),
    }
}
