//! Configuration system for the `Wingchat` server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/wingchat-server/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use wingchat_proto::message::MAX_TEXT_LEN;

/// Errors that can occur when loading server configuration.
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

    /// A numeric limit was configured as zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the server.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerFileConfig,
    limits: LimitsFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// `[limits]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LimitsFileConfig {
    max_text_len: Option<usize>,
    max_history: Option<usize>,
    max_unread: Option<usize>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the messaging server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Wingchat messaging server")]
pub struct ServerCliArgs {
    /// Address to bind the server to.
    #[arg(short, long, env = "WINGCHAT_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/wingchat-server/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum message text length in bytes.
    #[arg(long)]
    pub max_text_len: Option<usize>,

    /// Maximum number of messages kept per conversation.
    #[arg(long)]
    pub max_history: Option<usize>,

    /// Maximum number of unread notifications kept per recipient.
    #[arg(long)]
    pub max_unread: Option<usize>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "WINGCHAT_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Store and validation limits applied by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum message text length in bytes.
    pub max_text_len: usize,
    /// Maximum number of messages kept per conversation (oldest dropped).
    pub max_history: usize,
    /// Maximum number of unread notifications per recipient (oldest dropped).
    pub max_unread: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_text_len: MAX_TEXT_LEN,
            max_history: 10_000,
            max_unread: 500,
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:9000`).
    pub bind_addr: String,
    /// Store and validation limits.
    pub limits: Limits,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            limits: Limits::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if a limit resolves to zero.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ServerConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &ServerCliArgs, file: &ServerConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            limits: Limits {
                max_text_len: cli
                    .max_text_len
                    .or(file.limits.max_text_len)
                    .unwrap_or(defaults.limits.max_text_len),
                max_history: cli
                    .max_history
                    .or(file.limits.max_history)
                    .unwrap_or(defaults.limits.max_history),
                max_unread: cli
                    .max_unread
                    .or(file.limits.max_unread)
                    .unwrap_or(defaults.limits.max_unread),
            },
            log_level: cli.log_level.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_text_len == 0 {
            return Err(ConfigError::ZeroLimit("max_text_len"));
        }
        if self.limits.max_history == 0 {
            return Err(ConfigError::ZeroLimit("max_history"));
        }
        if self.limits.max_unread == 0 {
            return Err(ConfigError::ZeroLimit("max_unread"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the server.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<ServerConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ServerConfigFile::default());
        };
        config_dir.join("wingchat-server").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
