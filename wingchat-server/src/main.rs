//! `Wingchat` messaging server.
//!
//! An axum server carrying the real-time messaging channel on `/ws` and
//! conversation history on `GET /messages/{counterpart_id}`.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9000
//! cargo run --bin wingchat-server
//!
//! # Run on custom address
//! cargo run --bin wingchat-server -- --bind 127.0.0.1:8080
//!
//! # Or via environment variable
//! WINGCHAT_ADDR=127.0.0.1:8080 cargo run --bin wingchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use wingchat_server::config::{ServerCliArgs, ServerConfig};
use wingchat_server::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting wingchat server");

    let state = Arc::new(ServerState::with_limits(config.limits));

    match server::start_server_with_state(&config.bind_addr, Arc::clone(&state)).await {
        Ok((bound_addr, mut handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            tokio::select! {
                result = &mut handle => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, "server task failed");
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!(
                        online = ?state.presence.online_identities(),
                        "shutdown requested, closing connections"
                    );
                    state.close_all_connections().await;
                    // Give writer tasks a moment to flush the close frames.
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    handle.abort();
                }
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
