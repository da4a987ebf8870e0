//! The unit of execution: tiered read, coalesced compute, tiered write.
//!
//! A [`Worker`] answers one request per [`Worker::execute`] call and keeps no
//! per-request state between calls. The sequence is:
//!
//! 1. Derive the [`CacheKey`] from the identity and the time window of `now`.
//! 2. Consult the [`TieredCache`]; a hit in either tier ends the run.
//! 3. On a confirmed miss, enter the [`CoalescingGroup`] for the key. The
//!    leader's operation calls the [`Lookup`] and writes the encoded result
//!    back to both tiers before handing it to every waiter.
//!
//! A tier failure in step 2 ends the run with [`crate::error::FlightError::CacheTier`]; the
//! lookup is not attempted, since the tier could not tell whether a value
//! exists. Lookup failures are shared by the waiters of that call and never
//! cached, so the next request for the key tries again.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::cache::{CacheKey, Tier, TieredCache};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::flight::{CoalescingGroup, Role};
use crate::lookup::Lookup;
use crate::metrics;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Where a successful run got its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    LocalHit,
    RemoteHit,
    Leader,
    Follower,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::LocalHit => "local_hit",
            Outcome::RemoteHit => "remote_hit",
            Outcome::Leader => "leader",
            Outcome::Follower => "follower",
        }
    }
}

impl From<Tier> for Outcome {
    fn from(tier: Tier) -> Self {
        match tier {
            Tier::Local => Outcome::LocalHit,
            Tier::Remote => Outcome::RemoteHit,
        }
    }
}

impl From<Role> for Outcome {
    fn from(role: Role) -> Self {
        match role {
            Role::Leader => Outcome::Leader,
            Role::Follower => Outcome::Follower,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct Completion<T> {
    pub value: T,
    pub outcome: Outcome,
    pub key: CacheKey,
    pub elapsed: Duration,
}

/// Key derivation and write-back settings.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub key_prefix: String,
    pub window_seconds: u64,
    /// TTL handed to the cache on write-back.
    pub ttl: Duration,
}

impl From<&CacheConfig> for WorkerSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            key_prefix: config.key_prefix.clone(),
            window_seconds: config.window_seconds,
            ttl: config.remote_ttl(),
        }
    }
}

pub struct Worker<L: Lookup> {
    cache: Arc<TieredCache>,
    group: CoalescingGroup<L::Output>,
    lookup: Arc<L>,
    settings: WorkerSettings,
}

impl<L: Lookup> Worker<L> {
    pub fn new(cache: Arc<TieredCache>, lookup: Arc<L>, settings: WorkerSettings) -> Self {
        Self {
            cache,
            group: CoalescingGroup::new(),
            lookup,
            settings,
        }
    }

    pub fn key_for(&self, identity: &str, now: DateTime<Utc>) -> CacheKey {
        CacheKey::new(
            &self.settings.key_prefix,
            identity,
            now,
            self.settings.window_seconds,
        )
    }

    /// Resolve the value for `identity` at `now`.
    ///
    /// Emits one structured log record per call carrying the outcome, elapsed
    /// time, key and error if any.
    pub async fn execute(
        &self,
        identity: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Completion<L::Output>> {
        let started = Instant::now();
        let key = self.key_for(identity, now);

        let result = self.resolve(identity, &key, cancel).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match result {
            Ok((value, outcome)) => {
                metrics::record_worker_run(outcome.as_str(), elapsed.as_secs_f64());
                info!(
                    outcome = outcome.as_str(),
                    elapsed_ms,
                    key = %key,
                    identity,
                    "Worker run completed"
                );
                Ok(Completion {
                    value,
                    outcome,
                    key,
                    elapsed,
                })
            }
            Err(e) => {
                metrics::record_worker_run("error", elapsed.as_secs_f64());
                error!(
                    outcome = "error",
                    error_kind = e.kind(),
                    error = %e,
                    elapsed_ms,
                    key = %key,
                    identity,
                    "Worker run failed"
                );
                Err(e)
            }
        }
    }

    async fn resolve(
        &self,
        identity: &str,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<(L::Output, Outcome)> {
        if let Some(hit) = self.cache.get(key.as_str(), cancel).await? {
            debug!("Cache hit in {} tier for {}", hit.tier, key);
            let value = serde_json::from_str(&hit.value)?;
            return Ok((value, hit.tier.into()));
        }

        let cache = Arc::clone(&self.cache);
        let lookup = Arc::clone(&self.lookup);
        let identity = identity.to_string();
        let write_key = key.to_string();
        let window = key.window();
        let ttl = self.settings.ttl;

        let (result, role) = self
            .group
            .call(key.as_str(), cancel, move || async move {
                let value = match lookup.fetch(&identity, window).await {
                    Ok(value) => {
                        metrics::record_lookup(true);
                        value
                    }
                    Err(e) => {
                        metrics::record_lookup(false);
                        return Err(e);
                    }
                };
                let encoded = serde_json::to_string(&value)?;
                // The write belongs to the shared call, not to any one waiter.
                cache
                    .set(&write_key, &encoded, ttl, &CancellationToken::new())
                    .await?;
                Ok(value)
            })
            .await;

        Ok((result?, role.into()))
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn lookup(&self) -> &Arc<L> {
        &self.lookup
    }

    /// Number of keys whose lookup is currently in flight.
    pub fn in_flight(&self) -> usize {
        self.group.in_flight()
    }
}
