//! `ZenTodo` — personal task tracker.
//!
//! Runs one command against the local task file, or against a hosted task
//! store when both a cloud URL and a user are configured. Configuration via
//! CLI flags, environment variables, or config file
//! (`~/.config/zentodo/config.toml`).
//!
//! ```bash
//! # Local mode
//! cargo run --bin zentodo -- add 完成项目报告 -c work -p high
//! cargo run --bin zentodo -- list --status active
//!
//! # Cloud mode
//! cargo run --bin zentodo -- --cloud-url ws://127.0.0.1:9400/ws --user alice list
//!
//! # Or via environment variables
//! ZENTODO_CLOUD_URL=ws://127.0.0.1:9400/ws ZENTODO_USER=alice cargo run -- stats
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use zentodo::cli::{self, CliError, Command};
use zentodo::config::{CliArgs, ClientConfig, CloudConfig};
use zentodo::identity::StaticIdentityProvider;
use zentodo::session::{CloudSession, LocalSession};
use zentodo::store::blob::FileBlobStore;
use zentodo::store::remote::WsTaskStore;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    match run(&cli).await {
        Ok(output) => {
            print!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("zentodo: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging.
///
/// Logs go to `file_path` when given, otherwise to stderr so stdout only
/// carries command output. Returns a [`WorkerGuard`] that must be held until
/// shutdown to flush buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| Some((p.parent()?, p.file_name()?)))
    else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(cli: &CliArgs) -> Result<String, CliError> {
    let config = ClientConfig::load(cli)?;
    let command = cli.command.clone().unwrap_or_default();

    match config.to_cloud_config()? {
        Some(cloud) => run_cloud(&config, &cloud, &command).await,
        None => run_local(&config, &command),
    }
}

fn run_local(config: &ClientConfig, command: &Command) -> Result<String, CliError> {
    tracing::debug!(data_dir = %config.data_dir.display(), "local mode");
    let blob = FileBlobStore::new(&config.data_dir);
    let mut session = LocalSession::open(blob, &config.storage_key, config.seed_examples)?;
    let result = cli::execute_local(&mut session, command, config);
    session.close();
    result
}

async fn run_cloud(
    config: &ClientConfig,
    cloud: &CloudConfig,
    command: &Command,
) -> Result<String, CliError> {
    tracing::debug!(url = %cloud.url, user = %cloud.user, "cloud mode");
    let store = WsTaskStore::connect(&cloud.url, cloud.connect_timeout, cloud.request_timeout).await?;
    let identity = StaticIdentityProvider::signed_in(cloud.user.clone());
    let mut session = CloudSession::open(store, identity).await?;
    let result = cli::execute_cloud(&mut session, command, config).await;
    session.close();
    result
}
