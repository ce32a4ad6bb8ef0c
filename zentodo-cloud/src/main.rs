//! `ZenTodo` hosted task store server.
//!
//! ```bash
//! cargo run --bin zentodo-cloud -- --bind 127.0.0.1:9400
//! ```

use std::sync::Arc;

use clap::Parser;
use zentodo_cloud::config::{CloudCliArgs, CloudConfig};
use zentodo_cloud::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = CloudCliArgs::parse();

    let config = match CloudConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        max_tasks_per_owner = config.max_tasks_per_owner,
        pending_snapshots = config.pending_snapshots,
        "starting zentodo task store"
    );

    let state = Arc::new(ServerState::with_collection(config.collection()));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "task store listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "task store server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start task store");
            std::process::exit(1);
        }
    }
}
