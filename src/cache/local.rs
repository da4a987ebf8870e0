// In-process LRU tier
// Author: kelexine (https://github.com/kelexine)

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

/// Bounded, thread-safe local cache.
///
/// Entries leave either by least-recently-used eviction once `capacity` is
/// exceeded or lazily on the first read after their expiry.
pub struct LocalCache {
    entries: Mutex<LruCache<String, LocalEntry>>,
    ttl: Duration,
}

impl LocalCache {
    /// A zero `capacity` is bumped to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Inserts with the smaller of the tier's own ttl and `ttl`.
    pub fn insert(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl.min(self.ttl);
        self.entries
            .lock()
            .put(key.to_string(), LocalEntry { value, expires_at });
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_eviction() {
        let cache = LocalCache::new(2, Duration::from_secs(60));
        cache.insert("a", "1".into(), Duration::from_secs(60));
        cache.insert("b", "2".into(), Duration::from_secs(60));
        // Touch "a" so "b" becomes least recently used
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        cache.insert("c", "3".into(), Duration::from_secs(60));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_dropped() {
        let cache = LocalCache::new(8, Duration::from_secs(5));
        cache.insert("k", "v".into(), Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_absent_key() {
        let cache = LocalCache::new(1, Duration::from_secs(1));
        assert!(!cache.remove("missing"));
    }
}
