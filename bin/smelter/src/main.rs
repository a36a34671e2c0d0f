//! smelter server binary
//!
//! Runs a forked-chain execution server: a local JSON-RPC node whose world
//! state is a remote chain pinned at a fork block, overlaid with in-memory
//! session state.

use alloy_primitives::U256;
use clap::Parser;
use smelter_primitives::{ForkConfig, StateReader};
use smelter_provider::BatchHttpReader;
use smelter_rpc::{serve, AppState, SessionStore};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// smelter command line arguments
#[derive(Debug, Parser)]
#[clap(name = "smelter", about = "fork a live chain behind a local rpc endpoint")]
struct Cli {
    /// RPC URL of the chain to fork
    #[clap(long = "rpcURL")]
    rpc_url: String,

    /// Block to pin the fork at (0 = use the upstream tip)
    #[clap(long = "forkBlock", default_value = "0")]
    fork_block: u64,

    /// Seconds an idle session lives before the reaper drops it
    #[clap(long = "stateTTL", default_value = "1800")]
    state_ttl: u64,

    /// Seconds between reaper passes
    #[clap(long = "cleanupInterval", default_value = "60")]
    cleanup_interval: u64,

    /// Listen port
    #[clap(long, default_value = "6969")]
    port: u16,

    /// Log level
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let shutdown = CancellationToken::new();
    let reader = Arc::new(BatchHttpReader::new(
        &cli.rpc_url,
        Handle::current(),
        shutdown.clone(),
    )?);

    let chain_id = reader.chain_id()?;
    let fork_block = if cli.fork_block == 0 {
        U256::from(reader.block_number()?)
    } else {
        U256::from(cli.fork_block)
    };
    tracing::info!(rpc = %cli.rpc_url, chain_id, %fork_block, "pinning fork");

    let sessions = Arc::new(SessionStore::new(
        ForkConfig { chain_id, fork_block },
        reader,
        Duration::from_secs(cli.state_ttl),
    ));

    let reaper = {
        let sessions = Arc::clone(&sessions);
        let token = shutdown.clone();
        let interval = Duration::from_secs(cli.cleanup_interval);
        tokio::spawn(async move { sessions.watch(interval, token).await })
    };

    let signal = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                shutdown.cancel();
            }
        })
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", cli.port).parse()?;
    let state = Arc::new(AppState::new(sessions, shutdown.clone()));
    let result = serve(addr, state, shutdown.clone()).await;

    shutdown.cancel();
    let _ = reaper.await;
    signal.abort();

    result
}
