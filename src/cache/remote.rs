//! Shared remote cache tier.
//!
//! [`RemoteCache`] is the boundary to a cache shared between processes. The
//! contract that matters is the return type of [`RemoteCache::get`]:
//! `Ok(None)` is a *confirmed* miss, while `Err(_)` means the tier could not
//! tell. Callers must never fold the second case into the first.
//!
//! [`MemoryRemote`] is an in-process implementation with per-entry TTLs, an
//! optional simulated round-trip latency and an availability switch so that
//! connectivity failures can be exercised.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::error::{FlightError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// A value read from the remote tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteValue {
    pub value: String,
    /// Remaining lifetime of the entry; `None` if it does not expire.
    pub ttl: Option<Duration>,
}

/// Boundary to a shared cache service.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    /// Fetch `key` along with its remaining TTL. `Ok(None)` means the tier
    /// confirmed the key is absent.
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Remove every key in `keys`. Absent keys are not an error.
    async fn delete(&self, keys: &[&str]) -> Result<()>;
}

struct RemoteEntry {
    value: String,
    expires_at: Instant,
}

/// In-process stand-in for a networked cache.
#[derive(Default)]
pub struct MemoryRemote {
    entries: RwLock<HashMap<String, RemoteEntry>>,
    latency: Duration,
    offline: AtomicBool,
    gets: AtomicU64,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `latency` to every round trip.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// While offline every operation fails with a tier error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `get` round trips attempted so far.
    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn round_trip(&self) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FlightError::remote("connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteCache for MemoryRemote {
    async fn get(&self, key: &str) -> Result<Option<RemoteValue>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.round_trip().await?;

        let now = Instant::now();
        let expired = {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    return Ok(Some(RemoteValue {
                        value: entry.value.clone(),
                        ttl: Some(entry.expires_at - now),
                    }))
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            trace!("Remote entry expired: {}", key);
            let mut entries = self.entries.write();
            if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.round_trip().await?;
        self.entries.write().insert(
            key.to_string(),
            RemoteEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, keys: &[&str]) -> Result<()> {
        self.round_trip().await?;
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
