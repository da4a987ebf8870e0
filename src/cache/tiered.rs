// Two-level read-through cache: local LRU first, shared remote second
// Author: kelexine (https://github.com/kelexine)

use crate::cache::local::LocalCache;
use crate::cache::models::{CacheHit, CacheStats, Tier};
use crate::cache::remote::{RemoteCache, RemoteValue};
use crate::config::CacheConfig;
use crate::error::{FlightError, Result};
use crate::metrics;
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Local-first, remote-second cache with a uniform get/set/delete contract.
pub struct TieredCache {
    local: LocalCache,
    remote: Arc<dyn RemoteCache>,
    stats: RwLock<CacheStats>,
}

impl TieredCache {
    pub fn new(local: LocalCache, remote: Arc<dyn RemoteCache>) -> Self {
        Self {
            local,
            remote,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn from_config(config: &CacheConfig, remote: Arc<dyn RemoteCache>) -> Self {
        Self::new(
            LocalCache::new(config.local_capacity, config.local_ttl()),
            remote,
        )
    }

    /// Look `key` up in both tiers.
    ///
    /// Returns `Ok(None)` only when both tiers confirmed the key is absent. A
    /// remote failure surfaces as [`FlightError::CacheTier`]. A remote hit is
    /// copied into the local tier for no longer than the entry has left.
    pub async fn get(&self, key: &str, cancel: &CancellationToken) -> Result<Option<CacheHit>> {
        if let Some(value) = self.local.get(key) {
            debug!("Local tier hit: {}", key);
            self.stats.write().local_hits += 1;
            metrics::record_cache_operation(Tier::Local, "hit");
            return Ok(Some(CacheHit {
                value,
                tier: Tier::Local,
            }));
        }
        metrics::record_cache_operation(Tier::Local, "miss");

        match cancellable(cancel, self.remote.get(key)).await {
            Ok(Some(RemoteValue { value, ttl })) => {
                debug!("Remote tier hit: {}", key);
                // Never outlive the remote entry.
                let ttl = ttl.unwrap_or_else(|| self.local.ttl());
                self.local.insert(key, value.clone(), ttl);
                self.stats.write().remote_hits += 1;
                metrics::record_cache_operation(Tier::Remote, "hit");
                Ok(Some(CacheHit {
                    value,
                    tier: Tier::Remote,
                }))
            }
            Ok(None) => {
                debug!("Confirmed miss in both tiers: {}", key);
                self.stats.write().misses += 1;
                metrics::record_cache_operation(Tier::Remote, "miss");
                Ok(None)
            }
            Err(FlightError::Cancelled) => Err(FlightError::Cancelled),
            Err(e) => {
                warn!("Remote tier could not answer for {}: {}", key, e);
                self.stats.write().tier_failures += 1;
                metrics::record_cache_operation(Tier::Remote, "failure");
                Err(e)
            }
        }
    }

    /// Write `value` to both tiers.
    ///
    /// The local write always happens. A remote failure is returned to the
    /// caller but the local entry stays in place.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.local.insert(key, value.to_string(), ttl);
        metrics::record_cache_operation(Tier::Local, "write");

        match cancellable(cancel, self.remote.set(key, value, ttl)).await {
            Ok(()) => {
                self.stats.write().writes += 1;
                metrics::record_cache_operation(Tier::Remote, "write");
                Ok(())
            }
            Err(FlightError::Cancelled) => Err(FlightError::Cancelled),
            Err(e) => {
                warn!("Remote write failed for {}: {}", key, e);
                self.stats.write().tier_failures += 1;
                metrics::record_cache_operation(Tier::Remote, "failure");
                Err(e)
            }
        }
    }

    /// Remove `keys` from both tiers. Keys absent from either tier are ignored.
    pub async fn delete(&self, keys: &[&str], cancel: &CancellationToken) -> Result<()> {
        for key in keys {
            self.local.remove(key);
        }
        cancellable(cancel, self.remote.delete(keys)).await
    }

    pub fn local(&self) -> &LocalCache {
        &self.local
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }
}

/// Races `fut` against the caller's cancellation.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FlightError::Cancelled),
        res = fut => res,
    }
}
