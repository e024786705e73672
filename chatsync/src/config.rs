//! Configuration for the `ChatSync` client.
//!
//! Layered resolution with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error (defaults are used). An
//! explicit `--config` path that doesn't exist is an error.

use std::path::PathBuf;

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
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    chat: ChatFileConfig,
    auth: AuthFileConfig,
}

/// `[network]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    ws_url: Option<String>,
    rest_url: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    event_buffer: Option<usize>,
}

/// `[auth]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct AuthFileConfig {
    token_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Default buffer size for the store event channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the chat room server.
    pub ws_url: Option<String>,
    /// Base URL of the REST persistence service.
    pub rest_url: Option<String>,
    /// Buffer size for the store event channel.
    pub event_buffer: usize,
    /// Path of the persisted refresh-token file, if overridden.
    pub token_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: None,
            rest_url: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
            token_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path is tried and silently ignored if
    /// missing.
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
    /// Priority: CLI > file > default. Separated from `load()` to enable
    /// unit testing without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            ws_url: cli.ws_url.clone().or_else(|| file.network.ws_url.clone()),
            rest_url: cli
                .rest_url
                .clone()
                .or_else(|| file.network.rest_url.clone()),
            event_buffer: file.chat.event_buffer.unwrap_or(defaults.event_buffer),
            token_file: file.auth.token_file.clone(),
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Client-side chat synchronization engine")]
pub struct CliArgs {
    /// WebSocket URL of the chat room server.
    #[arg(long, env = "CHATSYNC_WS_URL")]
    pub ws_url: Option<String>,

    /// Base URL of the REST persistence service.
    #[arg(long, env = "CHATSYNC_REST_URL")]
    pub rest_url: Option<String>,

    /// Session user id.
    #[arg(long, env = "CHATSYNC_SESSION_ID", default_value = "")]
    pub session_id: String,

    /// Session display name.
    #[arg(long, env = "CHATSYNC_DISPLAY_NAME", default_value = "")]
    pub display_name: String,

    /// Session access token.
    #[arg(long, env = "CHATSYNC_TOKEN", default_value = "")]
    pub token: String,

    /// Path to config file (default: `~/.config/chatsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_LOG")]
    pub log_level: String,

    /// Path to a log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and a missing
/// file is treated as empty config.
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
        config_dir.join("chatsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
