//! Configuration for the `dmsync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/dmsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use dmsync_proto::message::{MAX_MESSAGE_SIZE, UserId};

use crate::chat::SessionConfig;
use crate::chat::retry::MAX_RETRY_COUNT;
use crate::presence::DEFAULT_TYPING_TIMEOUT;
use crate::presence::typing::DEFAULT_TYPING_THROTTLE;

/// Bounds for the outbound typing throttle.
const TYPING_THROTTLE_RANGE: (Duration, Duration) =
    (Duration::from_secs(2), Duration::from_secs(3));

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
    identity: IdentityFileConfig,
    chat: ChatFileConfig,
    presence: PresenceFileConfig,
    display: DisplayFileConfig,
}

/// `[identity]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct IdentityFileConfig {
    me: Option<String>,
    partner: Option<String>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    max_retry_count: Option<u32>,
    max_message_size: Option<usize>,
    event_buffer: Option<usize>,
    subscription_buffer: Option<usize>,
}

/// `[presence]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct PresenceFileConfig {
    typing_timeout_ms: Option<u64>,
    typing_throttle_ms: Option<u64>,
}

/// `[display]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DisplayFileConfig {
    timestamp_format: Option<String>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Identity --
    /// Local user id.
    pub me: Option<String>,
    /// Conversation partner id.
    pub partner: Option<String>,

    // -- Chat --
    /// Manual retries allowed per message.
    pub max_retry_count: u32,
    /// Maximum outgoing content size in bytes.
    pub max_message_size: usize,
    /// Buffer size for the `ChatSession` event channel.
    pub event_buffer: usize,
    /// Queue capacity of each push subscription.
    pub subscription_buffer: usize,

    // -- Presence --
    /// Lifetime of a typing indicator without an explicit expiry.
    pub typing_timeout: Duration,
    /// Minimum spacing between outbound typing signals.
    pub typing_throttle: Duration,

    // -- Display --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            me: None,
            partner: None,
            max_retry_count: MAX_RETRY_COUNT,
            max_message_size: MAX_MESSAGE_SIZE,
            event_buffer: 256,
            subscription_buffer: 64,
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            typing_throttle: DEFAULT_TYPING_THROTTLE,
            timestamp_format: "%H:%M:%S".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path (`~/.config/dmsync/config.toml`)
    /// is tried and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
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

        let typing_throttle = file
            .presence
            .typing_throttle_ms
            .map_or(defaults.typing_throttle, Duration::from_millis);
        let clamped = typing_throttle.clamp(TYPING_THROTTLE_RANGE.0, TYPING_THROTTLE_RANGE.1);
        if clamped != typing_throttle {
            tracing::warn!(
                configured_ms = typing_throttle.as_millis(),
                used_ms = clamped.as_millis(),
                "typing_throttle_ms out of range"
            );
        }

        Self {
            me: cli.me.clone().or_else(|| file.identity.me.clone()),
            partner: cli
                .partner
                .clone()
                .or_else(|| file.identity.partner.clone()),
            max_retry_count: file
                .chat
                .max_retry_count
                .unwrap_or(defaults.max_retry_count),
            max_message_size: file
                .chat
                .max_message_size
                .unwrap_or(defaults.max_message_size),
            event_buffer: file.chat.event_buffer.unwrap_or(defaults.event_buffer),
            subscription_buffer: file
                .chat
                .subscription_buffer
                .unwrap_or(defaults.subscription_buffer),
            typing_timeout: file
                .presence
                .typing_timeout_ms
                .map_or(defaults.typing_timeout, Duration::from_millis),
            typing_throttle: clamped,
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.display.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
        }
    }

    /// The local user and partner, if both are configured and non-empty.
    #[must_use]
    pub fn identities(&self) -> Option<(UserId, UserId)> {
        let me = self.me.as_deref().filter(|s| !s.is_empty())?;
        let partner = self.partner.as_deref().filter(|s| !s.is_empty())?;
        Some((UserId::new(me), UserId::new(partner)))
    }

    /// Build the [`SessionConfig`] for a chat session.
    #[must_use]
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            max_retry_count: self.max_retry_count,
            max_message_size: self.max_message_size,
            typing_timeout: self.typing_timeout,
            typing_throttle: self.typing_throttle,
            event_buffer: self.event_buffer,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(
    version,
    about = "Replay a capture of push events through the DM sync engine"
)]
pub struct CliArgs {
    /// JSON-lines capture of push events to replay.
    pub capture: PathBuf,

    /// Local user id.
    #[arg(long, env = "DMSYNC_ME")]
    pub me: Option<String>,

    /// Conversation partner id.
    #[arg(long, env = "DMSYNC_PARTNER")]
    pub partner: Option<String>,

    /// Replay with the conversation off screen (no read acknowledgements).
    #[arg(long)]
    pub hidden: bool,

    /// Path to config file (default: `~/.config/dmsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "DMSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/dmsync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("dmsync").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
