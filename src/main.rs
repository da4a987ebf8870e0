// tierflight - Bounded worker pool with a tiered cache and request coalescing
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tierflight::app;
use tierflight::cache::MemoryRemote;
use tierflight::cli::Args;
use tierflight::config::AppConfig;
use tierflight::metrics;
use tierflight::utils::logging;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration, flags win over file and environment
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    if args.dump_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;

    // Phase 3: Build the runtime sized from config
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.pool.worker_threads)
        .enable_all()
        .build()?;

    runtime.block_on(run(config, args.print_metrics))
}

async fn run(config: AppConfig, print_metrics: bool) -> Result<()> {
    info!("Starting tierflight v{}", env!("CARGO_PKG_VERSION"));

    // Phase 4: Assemble cache tiers, worker, pool and dispatcher
    let remote = Arc::new(MemoryRemote::with_latency(config.cache.remote_latency()));
    let dispatcher = Arc::new(app::build_dispatcher(&config, remote));
    info!(
        capacity = config.pool.capacity,
        requests = config.run.requests,
        identity = %config.run.identity,
        "Pipeline ready"
    );

    // Phase 5: Watch for signals and the global deadline while the batch runs
    let lifecycle = tokio::spawn(watch_lifecycle(
        dispatcher.shutdown_token(),
        dispatcher.cancel_token(),
        config.run.deadline(),
    ));

    let summary = app::run_batch(Arc::clone(&dispatcher), &config.run, Utc::now()).await;
    lifecycle.abort();

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        outcomes = ?summary.outcomes,
        errors = ?summary.errors,
        lookup_calls = dispatcher.worker().lookup().calls(),
        faulted = summary.dispatch.faulted,
        drained = summary.dispatch.drained,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Batch finished"
    );

    if print_metrics {
        println!("{}", metrics::gather_metrics());
    }

    info!("Shut down gracefully");
    Ok(())
}

/// Stops intake on Ctrl+C/SIGTERM; cancels in-flight work at the deadline.
async fn watch_lifecycle(
    shutdown: CancellationToken,
    cancel: CancellationToken,
    deadline: Option<Duration>,
) {
    let deadline_reached = async {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline_reached);

    let expired = tokio::select! {
        _ = shutdown_signal() => {
            shutdown.cancel();
            false
        }
        _ = &mut deadline_reached => true,
    };
    if !expired {
        deadline_reached.await;
    }

    warn!("Global deadline reached, cancelling in-flight work");
    shutdown.cancel();
    cancel.cancel();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, no further work is accepted");
        },
        _ = terminate => {
            info!("Received SIGTERM signal, no further work is accepted");
        },
    }
}
