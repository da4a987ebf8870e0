// Worker behaviour: coalescing, tier precedence and failure handling
// Author: kelexine (https://github.com/kelexine)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tierflight::cache::{MemoryRemote, RemoteCache, TieredCache};
use tierflight::config::CacheConfig;
use tierflight::error::{FlightError, Result};
use tierflight::lookup::{Lookup, SimulatedLookup};
use tierflight::worker::{Outcome, Worker, WorkerSettings};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fails the first `failures` calls, then answers with the call number.
#[derive(Default)]
struct FlakyLookup {
    failures: u64,
    latency: Duration,
    calls: AtomicU64,
}

#[async_trait]
impl Lookup for FlakyLookup {
    type Output = u64;

    async fn fetch(&self, _identity: &str, _window: DateTime<Utc>) -> Result<u64> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.latency).await;
        if call <= self.failures {
            return Err(FlightError::Upstream(format!("attempt {} refused", call)));
        }
        Ok(call)
    }
}

fn worker<L: Lookup>(remote: Arc<MemoryRemote>, lookup: Arc<L>) -> Worker<L> {
    let config = CacheConfig::default();
    let cache = Arc::new(TieredCache::from_config(&config, remote));
    Worker::new(cache, lookup, WorkerSettings::from(&config))
}

#[tokio::test(start_paused = true)]
async fn test_fifty_concurrent_requests_share_one_lookup() {
    let lookup = Arc::new(SimulatedLookup::new(
        Duration::from_secs(2),
        vec!["abc".to_string()],
    ));
    let worker = Arc::new(worker(Arc::new(MemoryRemote::new()), lookup.clone()));
    let now = Utc::now();
    let started = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let worker = worker.clone();
        handles.push(tokio::spawn(async move {
            worker.execute("123", now, &CancellationToken::new()).await
        }));
    }

    let mut leaders = 0;
    for handle in handles {
        let completion = handle.await.unwrap().unwrap();
        assert_eq!(completion.value, vec!["abc".to_string()]);
        match completion.outcome {
            Outcome::Leader => leaders += 1,
            Outcome::Follower => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    let elapsed = started.elapsed();
    assert_eq!(lookup.calls(), 1);
    assert_eq!(leaders, 1);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(3), "batch took {:?}", elapsed);
    assert_eq!(worker.in_flight(), 0);
}

#[tokio::test]
async fn test_second_request_is_a_local_hit() {
    let remote = Arc::new(MemoryRemote::new());
    let lookup = Arc::new(SimulatedLookup::new(Duration::ZERO, vec!["a.com".into()]));
    let worker = worker(remote.clone(), lookup.clone());
    let cancel = CancellationToken::new();
    let now = Utc::now();

    let first = worker.execute("123", now, &cancel).await.unwrap();
    let second = worker.execute("123", now, &cancel).await.unwrap();

    assert_eq!(first.outcome, Outcome::Leader);
    assert_eq!(second.outcome, Outcome::LocalHit);
    assert_eq!(first.key, second.key);
    assert_eq!(lookup.calls(), 1);
    // Written through to the shared tier as JSON
    assert_eq!(
        remote
            .get(first.key.as_str())
            .await
            .unwrap()
            .map(|hit| hit.value)
            .as_deref(),
        Some("[\"a.com\"]")
    );
}

#[tokio::test]
async fn test_value_from_remote_tier() {
    let remote = Arc::new(MemoryRemote::new());
    let lookup = Arc::new(SimulatedLookup::default());
    let worker = worker(remote.clone(), lookup.clone());
    let now = Utc::now();
    let key = worker.key_for("123", now);

    remote
        .set(key.as_str(), "[\"shared.example\"]", Duration::from_secs(5))
        .await
        .unwrap();

    let completion = worker
        .execute("123", now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(completion.outcome, Outcome::RemoteHit);
    assert_eq!(completion.value, vec!["shared.example".to_string()]);
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn test_tier_failure_does_not_compute() {
    let remote = Arc::new(MemoryRemote::new());
    remote.set_offline(true);
    let lookup = Arc::new(SimulatedLookup::default());
    let worker = worker(remote, lookup.clone());

    let result = worker
        .execute("123", Utc::now(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(FlightError::CacheTier { .. })));
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test]
async fn test_corrupt_cached_value_is_a_codec_error() {
    let remote = Arc::new(MemoryRemote::new());
    let lookup = Arc::new(SimulatedLookup::default());
    let worker = worker(remote.clone(), lookup.clone());
    let now = Utc::now();
    let key = worker.key_for("123", now);

    remote
        .set(key.as_str(), "not json", Duration::from_secs(5))
        .await
        .unwrap();

    let result = worker.execute("123", now, &CancellationToken::new()).await;
    assert!(matches!(result, Err(FlightError::Codec(_))));
    assert_eq!(lookup.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_shared_then_retried() {
    let lookup = Arc::new(FlakyLookup {
        failures: 1,
        latency: Duration::from_millis(100),
        ..FlakyLookup::default()
    });
    let worker = Arc::new(worker(Arc::new(MemoryRemote::new()), lookup.clone()));
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..5 {
        let worker = worker.clone();
        handles.push(tokio::spawn(async move {
            worker.execute("123", now, &CancellationToken::new()).await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap();
        assert_eq!(
            result.map(|c| c.value),
            Err(FlightError::Upstream("attempt 1 refused".to_string()))
        );
    }
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);

    // Nothing was cached, the next request performs a fresh lookup
    let retry = worker
        .execute("123", now, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(retry.outcome, Outcome::Leader);
    assert_eq!(retry.value, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_follower_leaves_others_served() {
    let lookup = Arc::new(SimulatedLookup::new(Duration::from_secs(1), vec!["x".into()]));
    let worker = Arc::new(worker(Arc::new(MemoryRemote::new()), lookup.clone()));
    let now = Utc::now();

    let w = worker.clone();
    let leader = tokio::spawn(async move { w.execute("123", now, &CancellationToken::new()).await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let cancel = CancellationToken::new();
    let w = worker.clone();
    let c = cancel.clone();
    let follower = tokio::spawn(async move { w.execute("123", now, &c).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    assert!(matches!(follower.await.unwrap(), Err(FlightError::Cancelled)));
    let completion = leader.await.unwrap().unwrap();
    assert_eq!(completion.outcome, Outcome::Leader);
    assert_eq!(lookup.calls(), 1);
}

#[tokio::test]
async fn test_different_windows_use_different_keys() {
    let lookup = Arc::new(SimulatedLookup::default());
    let worker = worker(Arc::new(MemoryRemote::new()), lookup.clone());
    let cancel = CancellationToken::new();
    let now = Utc::now();

    worker.execute("123", now, &cancel).await.unwrap();
    worker
        .execute("123", now + chrono::Duration::seconds(1), &cancel)
        .await
        .unwrap();

    assert_eq!(lookup.calls(), 2);
}
