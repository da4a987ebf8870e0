//! Bounded dispatcher loop.
//!
//! The [`Dispatcher`] takes the next [`Job`], waits for a token from the
//! [`TokenPool`] and runs the [`Worker`] for it on a fresh task, under
//! [`shield::shield_with_cleanup`] so that the token goes back to the pool on
//! every exit path, panics included. Both waits also watch the shutdown
//! signal. An idle dispatcher holds no tokens.
//!
//! Two cancellation tokens govern a run:
//! - `shutdown` stops the loop from checking out further tokens.
//! - `cancel` is handed (as a child) to every worker run and aborts their
//!   waits, e.g. when a global deadline expires.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::PoolConfig;
use crate::error::{FlightError, Result};
use crate::lookup::Lookup;
use crate::pool::{Token, TokenPool};
use crate::shield;
use crate::worker::{Completion, Worker};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<Completion<T>>>;

/// A request waiting to be dispatched.
pub struct Job<T> {
    pub identity: String,
    pub at: DateTime<Utc>,
    /// Optional per-request bound on the worker run.
    pub deadline: Option<Duration>,
    reply: Option<Reply<T>>,
}

impl<T> Job<T> {
    /// A job whose result is delivered on the returned receiver.
    pub fn new(
        identity: impl Into<String>,
        at: DateTime<Utc>,
    ) -> (Self, oneshot::Receiver<Result<Completion<T>>>) {
        let (tx, rx) = oneshot::channel();
        let job = Self {
            identity: identity.into(),
            at,
            deadline: None,
            reply: Some(tx),
        };
        (job, rx)
    }

    /// A job nobody waits for; its outcome only shows up in logs and stats.
    pub fn detached(identity: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.into(),
            at,
            deadline: None,
            reply: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Submit a job and wait for its result.
///
/// Returns [`FlightError::Shutdown`] when the dispatcher stopped before the
/// job was run.
pub async fn submit<T>(
    jobs: &mpsc::Sender<Job<T>>,
    identity: impl Into<String>,
    at: DateTime<Utc>,
) -> Result<Completion<T>> {
    let (job, rx) = Job::new(identity, at);
    jobs.send(job).await.map_err(|_| FlightError::Shutdown)?;
    rx.await.map_err(|_| FlightError::Shutdown)?
}

/// Shutdown behaviour of the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Wait for every outstanding worker before [`Dispatcher::run`] returns.
    pub wait_on_shutdown: bool,
    /// Upper bound on that wait; `None` waits until every worker is done.
    ///
    /// When the bound expires `run` returns with
    /// [`DispatchReport::drained`] unset while the remaining workers keep
    /// running and return their tokens as they finish.
    pub shutdown_timeout: Option<Duration>,
}

impl From<&PoolConfig> for DispatchSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            wait_on_shutdown: config.wait_on_shutdown,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct DispatchStats {
    launched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    faulted: AtomicU64,
}

/// Counters for one dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub faulted: u64,
    /// Whether every token was back in the pool when `run` returned.
    pub drained: bool,
}

pub struct Dispatcher<L: Lookup> {
    pool: Arc<TokenPool>,
    worker: Arc<Worker<L>>,
    settings: DispatchSettings,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    stats: Arc<DispatchStats>,
}

impl<L: Lookup> Dispatcher<L> {
    pub fn new(pool: Arc<TokenPool>, worker: Arc<Worker<L>>, settings: DispatchSettings) -> Self {
        Self {
            pool,
            worker,
            settings,
            shutdown: CancellationToken::new(),
            cancel: CancellationToken::new(),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Cancelling this token stops the loop from launching more work.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancelling this token aborts the waits of every running worker.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn pool(&self) -> &Arc<TokenPool> {
        &self.pool
    }

    pub fn worker(&self) -> &Arc<Worker<L>> {
        &self.worker
    }

    /// Run the dispatch loop until shutdown is signalled or `jobs` closes.
    ///
    /// With `wait_on_shutdown` set, returns only after every launched worker
    /// has handed its token back, or once `shutdown_timeout` (if any) expires.
    pub async fn run(&self, mut jobs: mpsc::Receiver<Job<L::Output>>) -> DispatchReport {
        info!(capacity = self.pool.capacity(), "Dispatcher started");

        loop {
            let job = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signalled, no further work is accepted");
                    break;
                }
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => {
                        debug!("Job channel closed");
                        break;
                    }
                },
            };

            // A token is only checked out once there is a job to run with it.
            let token = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown signalled, no further work is accepted");
                    // Dropping the job tells its submitter the dispatcher stopped.
                    drop(job);
                    break;
                }
                token = self.pool.acquire() => match token {
                    Ok(token) => token,
                    Err(_) => break,
                },
            };

            self.launch(token, job);
        }

        // Refuse anything still queued; their submitters see `Shutdown`.
        jobs.close();

        let drained = if self.settings.wait_on_shutdown {
            self.wait_for_workers().await
        } else {
            debug!(
                outstanding = self.pool.capacity() - self.pool.available(),
                "Returning without waiting for workers"
            );
            self.pool.available() == self.pool.capacity()
        };

        let report = self.report(drained);
        info!(
            launched = report.launched,
            succeeded = report.succeeded,
            failed = report.failed,
            faulted = report.faulted,
            drained = report.drained,
            "Dispatcher stopped"
        );
        report
    }

    async fn wait_for_workers(&self) -> bool {
        let drain = async {
            match self.settings.shutdown_timeout {
                Some(limit) => timeout(limit, self.pool.drain()).await,
                None => Ok(self.pool.drain().await),
            }
        };
        match drain.await {
            Ok(Ok(())) => {
                debug!("All tokens returned to the pool");
                true
            }
            Ok(Err(e)) => {
                warn!("Token pool drain failed: {}", e);
                false
            }
            Err(_) => {
                warn!(
                    "Drain timed out ({} workers still running)",
                    self.pool.capacity() - self.pool.available()
                );
                false
            }
        }
    }

    fn launch(&self, token: Token, job: Job<L::Output>) {
        let slot = token.slot();
        self.stats.launched.fetch_add(1, Ordering::Relaxed);
        debug!(slot, identity = %job.identity, "Launching worker");

        let pool = Arc::clone(&self.pool);
        let worker = Arc::clone(&self.worker);
        let stats = Arc::clone(&self.stats);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            let Job {
                identity,
                at,
                deadline,
                reply,
            } = job;
            let label = format!("worker slot {}", slot);
            let stats = &stats;
            let settled = AtomicBool::new(false);
            let settled = &settled;

            let run = async {
                let result = match deadline {
                    Some(limit) => timeout(limit, worker.execute(&identity, at, &cancel))
                        .await
                        .unwrap_or(Err(FlightError::Cancelled)),
                    None => worker.execute(&identity, at, &cancel).await,
                };
                match &result {
                    Ok(_) => stats.succeeded.fetch_add(1, Ordering::Relaxed),
                    Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
                };
                settled.store(true, Ordering::Release);
                result
            };
            // Counters settle before the token goes back to the pool.
            let outcome = shield::shield_with_cleanup(&label, run, move || {
                if !settled.load(Ordering::Acquire) {
                    stats.faulted.fetch_add(1, Ordering::Relaxed);
                }
                pool.release(token);
            })
            .await;

            let result = match outcome {
                Ok(result) => result,
                Err(fault) => Err(FlightError::Fault(fault.to_string())),
            };

            if let Some(reply) = reply {
                // The submitter may have given up already.
                let _ = reply.send(result);
            }
        });
    }

    /// Snapshot of the counters so far.
    pub fn report(&self, drained: bool) -> DispatchReport {
        DispatchReport {
            launched: self.stats.launched.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            faulted: self.stats.faulted.load(Ordering::Relaxed),
            drained,
        }
    }
}
