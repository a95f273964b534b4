//! Cumulus server binary.
//!
//! # Usage
//!
//! ```bash
//! # In-memory variables, default liveness settings
//! cumulus-server --bind 0.0.0.0:9080
//!
//! # Durable variables and a project blocklist
//! cumulus-server --data cumulus.redb --filter filter.txt
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use cumulus_core::LivenessConfig;
use cumulus_server::{
    MemoryStorage, RedbStorage, Server, ServerError, ServerRuntimeConfig, Storage,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cumulus cloud-variable server
#[derive(Parser, Debug)]
#[command(name = "cumulus-server")]
#[command(about = "Cloud-variable server with bucketed liveness probing")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:9080")]
    bind: String,

    /// Path to the variable database; variables are kept in memory if unset
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Path to the project blocklist (one project id per line)
    #[arg(short, long)]
    filter: Option<PathBuf>,

    /// Probe timeout and handshake deadline in milliseconds
    #[arg(long, default_value = "30000")]
    timeout_ms: u64,

    /// Number of buckets connections are spread over
    #[arg(long, default_value = "100")]
    buckets: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        data_path: args.data,
        filter_path: args.filter,
        liveness: LivenessConfig {
            timeout: Duration::from_millis(args.timeout_ms),
            bucket_count: args.buckets,
        },
    };
    config.liveness.validate().map_err(ServerError::from)?;

    tracing::info!(
        bind = %config.bind_address,
        timeout_ms = args.timeout_ms,
        buckets = args.buckets,
        "Cumulus server starting"
    );

    match config.data_path.clone() {
        Some(path) => {
            tracing::info!(path = %path.display(), "using durable storage");
            serve(config, RedbStorage::open(&path)?).await?;
        },
        None => {
            tracing::warn!("No data path provided - variables are lost on restart");
            serve(config, MemoryStorage::new()).await?;
        },
    }

    Ok(())
}

async fn serve<S: Storage>(config: ServerRuntimeConfig, storage: S) -> Result<(), ServerError> {
    let server = Server::bind(config, storage).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server.run().await
}
