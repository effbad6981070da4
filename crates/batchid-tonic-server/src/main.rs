#![doc = include_str!("../README.md")]

mod server;

use batchid::ShardKey;
use clap::Parser;
use server::config::{CliArgs, Command, ServerConfig};
use server::serve::{plan_endpoints, spawn_endpoints};
use server::telemetry::{init_telemetry, shutdown_telemetry};
use server::topology::{GeneratorBinding, Topology};
use std::io::Write;
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry()?;

    let topology = Topology::assemble(&config.topology)?;
    log_startup_info(&config, &topology);

    let shutdown = CancellationToken::new();
    let mut servers = JoinSet::new();
    let plans = plan_endpoints(&topology);
    let serving = !plans.is_empty();

    let outcome = match spawn_endpoints(plans, &shutdown, &mut servers).await {
        Ok(()) => {
            warm_up(&topology.binding, &config.topology.preload_tags).await;
            match config.command {
                Command::Serve if serving => {
                    wait_for_signal().await;
                    Ok(())
                }
                Command::Serve => {
                    tracing::warn!("Topology places no endpoint in this process; nothing to serve");
                    Ok(())
                }
                Command::Generate { tag, count, shard } => {
                    print_ids(&topology.binding, &tag, count, shard).await
                }
            }
        }
        Err(e) => Err(e),
    };

    tracing::info!("Shutting down...");
    shutdown.cancel();
    while let Some(joined) = servers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Endpoint failed: {e:#}"),
            Err(e) => tracing::error!("Endpoint task panicked: {e}"),
        }
    }

    shutdown_telemetry(providers);
    outcome
}

fn log_startup_info(config: &ServerConfig, topology: &Topology) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting batchid ({}) with full config: {:#?}",
            topology.describe(),
            config
        );
    } else {
        tracing::info!("Starting batchid ({})", topology.describe());
    }
}

/// Loads the default shard of each tag, skipping tags already cached.
/// Failures are logged; the tag is then loaded on first use instead.
async fn warm_up(binding: &GeneratorBinding, tags: &[String]) {
    for tag in tags {
        match binding.ensure_loaded(tag).await {
            Ok(true) => tracing::info!(tag = %tag, "Preloaded batch"),
            Ok(false) => tracing::debug!(tag = %tag, "Batch already loaded"),
            Err(e) => tracing::warn!(tag = %tag, "Preload failed: {e}"),
        }
    }
}

async fn print_ids(
    binding: &GeneratorBinding,
    tag: &str,
    count: u64,
    shard: ShardKey,
) -> anyhow::Result<()> {
    let ids = binding.batch_generate(tag, count, shard).await?;
    let mut stdout = std::io::stdout().lock();
    for id in ids {
        writeln!(stdout, "{id}")?;
    }
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
