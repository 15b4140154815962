//! Configuration system for the `Wingchat` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wingchat/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;
use wingchat_proto::Identity;
use wingchat_proto::message::MAX_TEXT_LEN;

use crate::connection::ConnectionConfig;
use crate::session::SessionConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A required setting is absent.
    #[error("missing required setting: {0}")]
    Missing(&'static str),

    /// A URL setting could not be used.
    #[error("invalid {field} {url:?}: {reason}")]
    InvalidUrl {
        /// Which setting.
        field: &'static str,
        /// The configured value.
        url: String,
        /// What was wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    reconnect: ReconnectFileConfig,
    chat: ChatFileConfig,
    log: LogFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    server_url: Option<String>,
    http_url: Option<String>,
    identity: Option<String>,
    peer: Option<String>,
    connect_timeout_secs: Option<u64>,
    join_timeout_secs: Option<u64>,
    channel_capacity: Option<usize>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<u32>,
    max_attempts: Option<u32>,
    jitter: Option<bool>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_text_len: Option<usize>,
    ack_window_secs: Option<u64>,
}

/// `[log]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogFileConfig {
    level: Option<String>,
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Exponential backoff policy used when the connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Factor the delay grows by after each failed attempt.
    pub multiplier: u32,
    /// Give up after this many consecutive failures (`None` retries forever).
    pub max_attempts: Option<u32>,
    /// Randomize each delay within its upper half.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: Some(10),
            jitter: true,
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Network --
    /// WebSocket URL of the messaging server.
    pub server_url: Option<String>,
    /// Base URL for the history endpoint (derived from `server_url` if unset).
    pub http_url: Option<String>,
    /// Current identity.
    pub identity: Option<String>,
    /// Counterpart to open a conversation with on start.
    pub peer: Option<String>,
    /// Timeout for establishing the WebSocket.
    pub connect_timeout: Duration,
    /// Timeout for the `joined` acknowledgement.
    pub join_timeout: Duration,
    /// Capacity of the command and event channels.
    pub channel_capacity: usize,
    /// Backoff policy.
    pub reconnect: ReconnectConfig,

    // -- Chat --
    /// Maximum message text length in bytes.
    pub max_text_len: usize,
    /// How long a mark-as-read waits for its echo before rolling back.
    pub ack_window: Duration,

    // -- Logging --
    /// Log level filter string.
    pub log_level: String,
    /// Optional log file; logs go to stderr when unset.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            http_url: None,
            identity: None,
            peer: None,
            connect_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(5),
            channel_capacity: 256,
            reconnect: ReconnectConfig::default(),
            max_text_len: MAX_TEXT_LEN,
            ack_window: Duration::from_secs(10),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let reconnect = &file.reconnect;

        Self {
            server_url: cli
                .server_url
                .clone()
                .or_else(|| file.network.server_url.clone()),
            http_url: cli.http_url.clone().or_else(|| file.network.http_url.clone()),
            identity: cli.identity.clone().or_else(|| file.network.identity.clone()),
            peer: cli.peer.clone().or_else(|| file.network.peer.clone()),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            join_timeout: file
                .network
                .join_timeout_secs
                .map_or(defaults.join_timeout, Duration::from_secs),
            channel_capacity: file
                .network
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            reconnect: ReconnectConfig {
                initial_delay: reconnect
                    .initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: reconnect
                    .max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                multiplier: reconnect
                    .multiplier
                    .unwrap_or(defaults.reconnect.multiplier)
                    .max(1),
                max_attempts: match reconnect.max_attempts {
                    Some(0) => None,
                    Some(n) => Some(n),
                    None => defaults.reconnect.max_attempts,
                },
                jitter: reconnect.jitter.unwrap_or(defaults.reconnect.jitter),
            },
            max_text_len: file.chat.max_text_len.unwrap_or(defaults.max_text_len),
            ack_window: file
                .chat
                .ack_window_secs
                .map_or(defaults.ack_window, Duration::from_secs),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.log.level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli.log_file.clone().or_else(|| file.log.file.clone()),
        }
    }

    /// Current identity, required for connecting.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if no identity is configured.
    pub fn identity(&self) -> Result<Identity, ConfigError> {
        self.identity
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Identity::new)
            .ok_or(ConfigError::Missing("identity"))
    }

    /// Build a [`ConnectionConfig`] from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the server URL or identity is missing, or
    /// the URL is not a `ws://`/`wss://` URL.
    pub fn to_connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        let raw = self
            .server_url
            .clone()
            .ok_or(ConfigError::Missing("server_url"))?;
        let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl {
            field: "server_url",
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidUrl {
                field: "server_url",
                url: raw,
                reason: "scheme must be ws or wss".to_string(),
            });
        }

        Ok(ConnectionConfig {
            url,
            identity: self.identity()?,
            connect_timeout: self.connect_timeout,
            join_timeout: self.join_timeout,
            channel_capacity: self.channel_capacity,
            reconnect: self.reconnect.clone(),
        })
    }

    /// Base URL of the REST API.
    ///
    /// Uses `http_url` when set; otherwise derives it from `server_url` by
    /// mapping `ws`→`http`, `wss`→`https` and dropping the path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if neither URL is usable.
    pub fn history_base_url(&self) -> Result<Url, ConfigError> {
        if let Some(raw) = &self.http_url {
            return Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
                field: "http_url",
                url: raw.clone(),
                reason: e.to_string(),
            });
        }
        let raw = self
            .server_url
            .clone()
            .ok_or(ConfigError::Missing("server_url"))?;
        let invalid = |reason: String| ConfigError::InvalidUrl {
            field: "server_url",
            url: raw.clone(),
            reason,
        };
        let ws = Url::parse(&raw).map_err(|e| invalid(e.to_string()))?;
        let scheme = match ws.scheme() {
            "ws" => "http",
            "wss" => "https",
            other => return Err(invalid(format!("unsupported scheme {other}"))),
        };
        let host = ws
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let base = ws.port().map_or_else(
            || format!("{scheme}://{host}/"),
            |port| format!("{scheme}://{host}:{port}/"),
        );
        Url::parse(&base).map_err(|e| invalid(e.to_string()))
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_text_len: self.max_text_len,
            ack_window: self.ack_window,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Wingchat messaging client")]
pub struct CliArgs {
    /// WebSocket URL of the messaging server (e.g. `ws://127.0.0.1:9000/ws`).
    #[arg(long, env = "WINGCHAT_URL")]
    pub server_url: Option<String>,

    /// Base URL of the REST API (default: derived from the server URL).
    #[arg(long, env = "WINGCHAT_HTTP_URL")]
    pub http_url: Option<String>,

    /// Your identity.
    #[arg(long, env = "WINGCHAT_IDENTITY")]
    pub identity: Option<String>,

    /// Counterpart to chat with.
    #[arg(long, env = "WINGCHAT_PEER")]
    pub peer: Option<String>,

    /// Path to config file (default: `~/.config/wingchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, env = "WINGCHAT_LOG")]
    pub log_level: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("wingchat").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
