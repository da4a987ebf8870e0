//! Single-flight request coalescing.
//!
//! A [`CoalescingGroup`] guarantees that at most one execution of an operation
//! is in flight per key. The first caller for a key becomes the *leader*: its
//! operation is spawned onto its own task and its outcome is published through
//! a shared future. Callers arriving while that task runs become *followers*
//! and await the very same outcome; their own operation is never run.
//!
//! Waiting is cancellable per caller. Cancelling a follower, or the leader,
//! only stops that caller from waiting: the spawned operation runs to
//! completion and every waiter that is still attached observes its result.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::error::{FlightError, Result};
use crate::metrics;
use crate::shield;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;

/// How a caller took part in a coalesced call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Registered the call and had its operation executed.
    Leader,
    /// Joined a call that was already in flight.
    Follower,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
        }
    }
}

/// A call currently executing for one key.
///
/// The generation distinguishes this call from a later one registered under
/// the same key, so a finishing call never removes its successor.
struct InFlightCall<T> {
    generation: u64,
    outcome: SharedOutcome<T>,
}

type CallMap<T> = Arc<Mutex<HashMap<String, InFlightCall<T>>>>;

/// Removes the call record when the spawned operation finishes or unwinds.
struct Deregister<T> {
    calls: CallMap<T>,
    key: String,
    generation: u64,
}

impl<T> Drop for Deregister<T> {
    fn drop(&mut self) {
        let mut calls = self.calls.lock();
        if calls
            .get(&self.key)
            .is_some_and(|call| call.generation == self.generation)
        {
            calls.remove(&self.key);
        }
        metrics::inflight_finished();
        trace!("Coalesced call for {} deregistered", self.key);
    }
}

/// Keyed barrier allowing one in-flight execution per key.
pub struct CoalescingGroup<T> {
    calls: CallMap<T>,
    next_generation: AtomicU64,
}

impl<T> Default for CoalescingGroup<T> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }
}

impl<T> CoalescingGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes `f` for `key` unless a call for `key` is already in flight,
    /// in which case the existing call's outcome is awaited instead.
    ///
    /// `f` is only invoked for the leader, while the group's lock is held, so
    /// it must merely build the future and not block. Errors and panics of the
    /// operation are shared with every waiter exactly; nothing is retried.
    ///
    /// If `cancel` fires first this caller gets [`FlightError::Cancelled`]
    /// and the operation keeps running for the remaining waiters.
    pub async fn call<F, Fut>(&self, key: &str, cancel: &CancellationToken, f: F) -> (Result<T>, Role)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let (outcome, role) = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(call) => {
                    drop(f);
                    (call.outcome.clone(), Role::Follower)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.launch(key, generation, f());
                    calls.insert(
                        key.to_string(),
                        InFlightCall {
                            generation,
                            outcome: outcome.clone(),
                        },
                    );
                    (outcome, Role::Leader)
                }
            }
        };
        debug!("Joined coalesced call for {} as {}", key, role.as_str());

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} for {} cancelled while waiting", role.as_str(), key);
                Err(FlightError::Cancelled)
            }
            res = outcome => res,
        };
        (result, role)
    }

    /// Spawns the leader's operation and wraps its join handle in a shared future.
    ///
    /// Must be called with the call map locked, so that the record is in place
    /// before the spawned task can try to remove it.
    fn launch<Fut>(&self, key: &str, generation: u64, fut: Fut) -> SharedOutcome<T>
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        metrics::inflight_started();
        let deregister = Deregister {
            calls: Arc::clone(&self.calls),
            key: key.to_string(),
            generation,
        };
        let label = format!("coalesced call {}", key);

        let handle = tokio::spawn(async move {
            let _deregister = deregister;
            match shield::shield(&label, fut).await {
                Ok(result) => result,
                Err(fault) => Err(FlightError::Fault(fault.to_string())),
            }
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    Err(FlightError::Fault(shield::panic_message(e.into_panic().as_ref())))
                }
                Err(_) => Err(FlightError::Fault("coalesced call aborted".to_string())),
            }
        }
        .boxed()
        .shared()
    }

    /// Whether a call for `key` is currently executing.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.calls.lock().contains_key(key)
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
