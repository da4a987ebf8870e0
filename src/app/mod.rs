//! Pipeline assembly and the batch run performed by the binary.
//!
//! [`build_dispatcher`] wires the tiered cache, the simulated lookup, the
//! worker and the token pool from an [`AppConfig`]. [`run_batch`] fans a
//! number of concurrent requests for one identity into a dispatcher, waits
//! for all of them and summarizes what happened.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::{RemoteCache, TieredCache};
use crate::config::{AppConfig, RunConfig};
use crate::dispatch::{self, DispatchReport, DispatchSettings, Dispatcher};
use crate::lookup::{Lookup, SimulatedLookup};
use crate::pool::TokenPool;
use crate::worker::{Worker, WorkerSettings};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info};

/// Assemble a dispatcher backed by `remote` and a [`SimulatedLookup`].
pub fn build_dispatcher(
    config: &AppConfig,
    remote: Arc<dyn RemoteCache>,
) -> Dispatcher<SimulatedLookup> {
    let lookup = Arc::new(SimulatedLookup::from_config(&config.lookup));
    build_dispatcher_with(config, remote, lookup)
}

/// Assemble a dispatcher around any [`Lookup`].
pub fn build_dispatcher_with<L: Lookup>(
    config: &AppConfig,
    remote: Arc<dyn RemoteCache>,
    lookup: Arc<L>,
) -> Dispatcher<L> {
    let cache = Arc::new(TieredCache::from_config(&config.cache, remote));
    let worker = Arc::new(Worker::new(
        cache,
        lookup,
        WorkerSettings::from(&config.cache),
    ));
    let pool = Arc::new(TokenPool::new(config.pool.capacity));
    Dispatcher::new(pool, worker, DispatchSettings::from(&config.pool))
}

/// What a batch run produced.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub succeeded: u64,
    pub failed: u64,
    /// Successful runs per outcome label.
    pub outcomes: BTreeMap<&'static str, u64>,
    /// Failed runs per error kind.
    pub errors: BTreeMap<&'static str, u64>,
    pub elapsed: Duration,
    pub dispatch: DispatchReport,
}

/// Submit `run.requests` concurrent requests for `run.identity`, all stamped
/// with `now`, and wait for every reply and for the dispatcher to stop.
pub async fn run_batch<L>(
    dispatcher: Arc<Dispatcher<L>>,
    run: &RunConfig,
    now: DateTime<Utc>,
) -> BatchSummary
where
    L: Lookup,
    L::Output: Debug,
{
    let started = Instant::now();
    let (jobs_tx, jobs_rx) = mpsc::channel(dispatcher.pool().capacity());

    let d = Arc::clone(&dispatcher);
    let loop_handle = tokio::spawn(async move { d.run(jobs_rx).await });

    let mut requests = Vec::with_capacity(run.requests);
    for i in 0..run.requests {
        let jobs = jobs_tx.clone();
        let identity = run.identity.clone();
        requests.push(tokio::spawn(async move {
            let result = dispatch::submit(&jobs, identity, now).await;
            match &result {
                Ok(completion) => info!(
                    request = i,
                    outcome = completion.outcome.as_str(),
                    value = ?completion.value,
                    "Request finished"
                ),
                Err(e) => error!(request = i, error = %e, "Request failed"),
            }
            result
        }));
    }
    // The loop stops once every submitter is done and the channel closes.
    drop(jobs_tx);

    let mut summary = BatchSummary::default();
    for request in requests {
        match request.await {
            Ok(Ok(completion)) => {
                summary.succeeded += 1;
                *summary.outcomes.entry(completion.outcome.as_str()).or_default() += 1;
            }
            Ok(Err(e)) => {
                summary.failed += 1;
                *summary.errors.entry(e.kind()).or_default() += 1;
            }
            Err(e) => {
                summary.failed += 1;
                *summary.errors.entry("join").or_default() += 1;
                error!("Request task failed: {}", e);
            }
        }
    }

    summary.dispatch = match loop_handle.await {
        Ok(report) => report,
        Err(e) => {
            error!("Dispatcher task failed: {}", e);
            dispatcher.report(false)
        }
    };
    summary.elapsed = started.elapsed();
    summary
}
