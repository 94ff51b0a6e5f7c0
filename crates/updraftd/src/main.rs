//! updraftd — resumable-upload gateway daemon.
//!
//! Serves an upload collection backed by a disk-storing demo handler:
//!
//! ```text
//! updraftd --bind 0.0.0.0:8680 --data-dir /var/lib/updraft
//! ```
//!
//! Clients create uploads with `POST {collection}` plus an `Upload-Token`
//! header, resume with `PATCH {collection}/{token}`, query progress with
//! `HEAD`, and cancel with `DELETE`. `GET /status` reports the live
//! registry.

mod store;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Json;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use updraft_core::{GatewayConfig, TokenReusePolicy};
use updraft_gateway::Gateway;

use crate::store::FileStore;

#[derive(Parser)]
#[command(name = "updraftd", about = "Resumable-upload gateway daemon")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8680")]
    bind: SocketAddr,

    /// URL path of the upload collection.
    #[arg(long, default_value = "/uploads")]
    collection_path: String,

    /// Directory completed upload bodies are written to.
    #[arg(long, default_value = "./updraft-data")]
    data_dir: PathBuf,

    /// Per-upload buffer bound in bytes.
    #[arg(long, default_value = "262144")]
    max_buffer_bytes: usize,

    /// Seconds an idle upload survives before eviction.
    #[arg(long, default_value = "300")]
    idle_timeout: u64,

    /// Seconds a transfer may stall before it is aborted.
    #[arg(long, default_value = "60")]
    transfer_timeout: u64,

    /// Replace existing uploads when a creation reuses a live token
    /// (default is to reject with 409).
    #[arg(long)]
    replace_tokens: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tokio::fs::create_dir_all(&cli.data_dir).await?;

    let config = GatewayConfig {
        collection_path: cli.collection_path.clone(),
        max_buffered_bytes: cli.max_buffer_bytes,
        idle_timeout: Duration::from_secs(cli.idle_timeout),
        transfer_timeout: Duration::from_secs(cli.transfer_timeout),
        token_reuse: if cli.replace_tokens {
            TokenReusePolicy::Replace
        } else {
            TokenReusePolicy::Reject
        },
        ..GatewayConfig::default()
    };

    let handler = Arc::new(FileStore::new(cli.data_dir.clone()));
    let gateway = Gateway::new(config, handler);
    let reaper = gateway.spawn_reaper();

    let status_gateway = gateway.clone();
    let app = gateway
        .clone()
        .router()
        .route("/status", get(move || status(status_gateway.clone())));

    let listener = TcpListener::bind(cli.bind).await?;
    info!(
        address = %cli.bind,
        collection = %cli.collection_path,
        data_dir = %cli.data_dir.display(),
        "updraftd listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.stop().await;
    info!("updraftd stopped");
    Ok(())
}

/// Live registry snapshot for operators.
async fn status(gateway: Arc<Gateway>) -> Json<serde_json::Value> {
    let uploads: Vec<serde_json::Value> = gateway
        .registry()
        .snapshot()
        .into_iter()
        .map(|upload| {
            serde_json::json!({
                "token": upload.token.to_path_segment(),
                "state": upload.status.state.to_string(),
                "offset": upload.status.offset,
                "length": upload.status.total_length,
                "interop_version": upload.status.interop_version,
            })
        })
        .collect();
    let count = uploads.len();
    Json(serde_json::json!({
        "count": count,
        "uploads": uploads,
    }))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
    }
}
