//! Configuration system for the `ZenTodo` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/zentodo/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use zentodo_proto::task::{Category, ParseLabelError, Priority, UserId};

use crate::cli::Command;
use crate::store::blob::DEFAULT_KEY;

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

    /// A default category or priority is not a known label.
    #[error("invalid default: {0}")]
    InvalidLabel(#[from] ParseLabelError),

    /// The cloud URL is not a `ws://` or `wss://` URL.
    #[error("invalid cloud url {url}: {reason}")]
    InvalidCloudUrl {
        /// The configured URL.
        url: String,
        /// What is wrong with it.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    storage: StorageFileConfig,
    cloud: CloudFileConfig,
    tasks: TasksFileConfig,
    ui: UiFileConfig,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    data_dir: Option<PathBuf>,
    key: Option<String>,
    seed_examples: Option<bool>,
}

/// `[cloud]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct CloudFileConfig {
    url: Option<String>,
    user: Option<String>,
    connect_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
}

/// `[tasks]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TasksFileConfig {
    default_category: Option<String>,
    default_priority: Option<String>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Settings needed to reach the hosted store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    /// Store WebSocket URL.
    pub url: String,
    /// Account to sign in as.
    pub user: UserId,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Per-request reply timeout.
    pub request_timeout: Duration,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Storage --
    /// Directory holding the local task blob.
    pub data_dir: PathBuf,
    /// Key the local task array is stored under.
    pub storage_key: String,
    /// Seed the sample tasks when nothing is stored yet.
    pub seed_examples: bool,

    // -- Cloud --
    /// Hosted store URL; cloud mode needs this and `user`.
    pub cloud_url: Option<String>,
    /// Account for cloud mode.
    pub user: Option<String>,
    /// WebSocket handshake timeout.
    pub connect_timeout: Duration,
    /// Per-request reply timeout.
    pub request_timeout: Duration,

    // -- Tasks --
    /// Category for new tasks when none is given.
    pub default_category: Category,
    /// Priority for new tasks when none is given.
    pub default_priority: Priority,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir().map_or_else(|| PathBuf::from(".zentodo"), |d| d.join("zentodo")),
            storage_key: DEFAULT_KEY.to_string(),
            seed_examples: true,
            cloud_url: None,
            user: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            default_category: Category::Work,
            default_priority: Priority::Medium,
            timestamp_format: "%m-%d %H:%M".to_string(),
            event_buffer: 64,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed,
    /// or if a configured default label is unknown.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let default_category = match &file.tasks.default_category {
            Some(label) => label.parse()?,
            None => defaults.default_category,
        };
        let default_priority = match &file.tasks.default_priority {
            Some(label) => label.parse()?,
            None => defaults.default_priority,
        };

        Ok(Self {
            data_dir: cli
                .data_dir
                .clone()
                .or_else(|| file.storage.data_dir.clone())
                .unwrap_or(defaults.data_dir),
            storage_key: file.storage.key.clone().unwrap_or(defaults.storage_key),
            seed_examples: !cli.no_seed
                && file.storage.seed_examples.unwrap_or(defaults.seed_examples),
            cloud_url: cli.cloud_url.clone().or_else(|| file.cloud.url.clone()),
            user: cli.user.clone().or_else(|| file.cloud.user.clone()),
            connect_timeout: file
                .cloud
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            request_timeout: file
                .cloud
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            default_category,
            default_priority,
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
            event_buffer: file.ui.event_buffer.unwrap_or(defaults.event_buffer),
        })
    }

    /// Build a [`CloudConfig`] if both a cloud URL and a user are set.
    ///
    /// Returns `Ok(None)` for local mode.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCloudUrl`] if the URL does not parse or
    /// is not `ws`/`wss`.
    pub fn to_cloud_config(&self) -> Result<Option<CloudConfig>, ConfigError> {
        let (Some(url), Some(user)) = (&self.cloud_url, &self.user) else {
            return Ok(None);
        };
        if user.trim().is_empty() {
            return Ok(None);
        }

        let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidCloudUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidCloudUrl {
                url: url.clone(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        Ok(Some(CloudConfig {
            url: url.clone(),
            user: UserId::new(user.trim()),
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
        }))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "井井有条: a personal task tracker")]
pub struct CliArgs {
    /// WebSocket URL of the hosted task store (enables cloud mode with `--user`).
    #[arg(long, env = "ZENTODO_CLOUD_URL")]
    pub cloud_url: Option<String>,

    /// Account to sign in as in cloud mode.
    #[arg(long, env = "ZENTODO_USER")]
    pub user: Option<String>,

    /// Directory for the local task file.
    #[arg(long, env = "ZENTODO_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Do not seed sample tasks on first run.
    #[arg(long)]
    pub no_seed: bool,

    /// Path to config file (default: `~/.config/zentodo/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "warn", env = "ZENTODO_LOG")]
    pub log_level: String,

    /// Path to log file (default: stderr).
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: list).
    #[command(subcommand)]
    pub command: Option<Command>,
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
        config_dir.join("zentodo").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
