//! The expensive, idempotent lookup fronted by the cache.
//!
//! [`Lookup`] is the boundary to the upstream service. Implementations must be
//! safe to call concurrently for different keys; the worker makes sure a given
//! key is fetched at most once per in-flight window.
//!
//! [`SimulatedLookup`] stands in for the real service: it waits for a
//! configured latency and answers every identity with the same list. It keeps
//! its own call counter, so each run or test observes only its own calls.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use crate::config::LookupConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

/// Boundary to the upstream service.
#[async_trait]
pub trait Lookup: Send + Sync + 'static {
    /// Value produced for an identity; stored in the cache as JSON.
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Fetch the value for `identity` as of the window starting at `window`.
    async fn fetch(&self, identity: &str, window: DateTime<Utc>) -> Result<Self::Output>;
}

/// Mocked upstream returning a fixed list of domains.
#[derive(Debug, Default)]
pub struct SimulatedLookup {
    latency: Duration,
    response: Vec<String>,
    calls: AtomicU64,
}

impl SimulatedLookup {
    pub fn new(latency: Duration, response: Vec<String>) -> Self {
        Self {
            latency,
            response,
            calls: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(config.latency(), config.response.clone())
    }

    /// How many times `fetch` has been entered.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lookup for SimulatedLookup {
    type Output = Vec<String>;

    async fn fetch(&self, identity: &str, window: DateTime<Utc>) -> Result<Vec<String>> {
        let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            identity,
            window = %window.timestamp(),
            count,
            "Simulated lookup invoked"
        );
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_simulated_lookup_counts_calls() {
        let lookup = SimulatedLookup::new(Duration::from_secs(2), vec!["abc".to_string()]);
        let started = tokio::time::Instant::now();

        let value = lookup.fetch("123", Utc::now()).await.unwrap();

        assert_eq!(value, vec!["abc".to_string()]);
        assert_eq!(lookup.calls(), 1);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
