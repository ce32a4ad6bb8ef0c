//! Settings for the hosted task store.
//!
//! Three things are tunable: where the store listens, how many documents one
//! owner may keep, and whether an insert is published once unstamped before
//! the server timestamp lands. Each value comes from the first source that
//! sets it: `zentodo-cloud` flags, `ZENTODO_CLOUD_*` variables, the `[server]`
//! table of `~/.config/zentodo-cloud/config.toml`, then the built-in default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::collection::{DEFAULT_MAX_TASKS_PER_OWNER, TaskCollection};

/// Default listen address of the task store.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:9400";

/// Reasons the task store refuses to start with the given settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The listen address is not `host:port` with a numeric host.
    #[error("invalid bind address {addr:?}: {source}")]
    BindAddr {
        addr: String,
        source: std::net::AddrParseError,
    },

    /// A quota of zero would refuse every insert.
    #[error("max_tasks_per_owner must be at least 1")]
    ZeroQuota,
}

/// Contents of `config.toml`. Only the `[server]` table is read.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreConfigFile {
    server: StoreSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StoreSection {
    bind_addr: Option<String>,
    max_tasks_per_owner: Option<usize>,
    pending_snapshots: Option<bool>,
}

/// Command line of the `zentodo-cloud` binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ZenTodo hosted task store")]
pub struct CloudCliArgs {
    /// Listen address, e.g. `127.0.0.1:9400`.
    #[arg(short, long, env = "ZENTODO_CLOUD_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of `~/.config/zentodo-cloud/config.toml`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Documents one owner may keep before inserts are refused.
    #[arg(long, env = "ZENTODO_CLOUD_MAX_TASKS")]
    pub max_tasks_per_owner: Option<usize>,

    /// Publish each insert unstamped first (`true`) or only once stamped.
    #[arg(long)]
    pub pending_snapshots: Option<bool>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info", env = "ZENTODO_CLOUD_LOG")]
    pub log_level: String,
}

/// Settings the task store runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudConfig {
    pub bind_addr: String,
    /// Inserts past this many documents fail with `QuotaExceeded`.
    pub max_tasks_per_owner: usize,
    /// Publish an unstamped snapshot before the stamped one on insert.
    pub pending_snapshots: bool,
    pub log_level: String,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_tasks_per_owner: DEFAULT_MAX_TASKS_PER_OWNER,
            pending_snapshots: true,
            log_level: "info".to_string(),
        }
    }
}

impl CloudConfig {
    /// Reads the config file (if any), merges it under `cli` and checks the
    /// result.
    ///
    /// A missing file at the default location is fine; a missing file passed
    /// with `--config` is not.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, the bind
    /// address does not parse, or the quota is zero.
    pub fn load(cli: &CloudCliArgs) -> Result<Self, ConfigError> {
        let file = match cli.config.as_deref() {
            Some(path) => read_config_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_config_file(&path)?,
                _ => StoreConfigFile::default(),
            },
        };
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    fn resolve(cli: &CloudCliArgs, file: &StoreConfigFile) -> Self {
        let section = &file.server;
        let defaults = Self::default();
        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| section.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_tasks_per_owner: cli
                .max_tasks_per_owner
                .or(section.max_tasks_per_owner)
                .unwrap_or(defaults.max_tasks_per_owner),
            pending_snapshots: cli
                .pending_snapshots
                .or(section.pending_snapshots)
                .unwrap_or(defaults.pending_snapshots),
            log_level: cli.log_level.clone(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr
            .parse::<SocketAddr>()
            .map_err(|source| ConfigError::BindAddr {
                addr: self.bind_addr.clone(),
                source,
            })?;
        if self.max_tasks_per_owner == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        Ok(())
    }

    /// An empty document collection with this quota and publish mode.
    #[must_use]
    pub fn collection(&self) -> TaskCollection {
        TaskCollection::with_config(self.max_tasks_per_owner, self.pending_snapshots)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("zentodo-cloud").join("config.toml"))
}

fn read_config_file(path: &Path) -> Result<StoreConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}
