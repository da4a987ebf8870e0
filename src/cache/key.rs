// Cache key derivation from request identity and a time window
// Author: kelexine (https://github.com/kelexine)

use chrono::{DateTime, Utc};
use std::fmt;

/// Deterministic key grouping equivalent requests that arrive within the
/// same quantization window.
///
/// Layout: `{prefix}{identity}_{window_start}` with `window_start` the unix
/// second at which the window containing `now` begins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    window_start: i64,
}

impl CacheKey {
    pub fn new(prefix: &str, identity: &str, now: DateTime<Utc>, window_seconds: u64) -> Self {
        let window_start = window_start(now, window_seconds);
        Self {
            key: format!("{}{}_{}", prefix, identity, window_start),
            window_start,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Start of the window this key belongs to.
    pub fn window(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.window_start, 0).unwrap_or_default()
    }
}

/// Floors `now` to a multiple of `window_seconds` (a zero window is treated as one second).
fn window_start(now: DateTime<Utc>, window_seconds: u64) -> i64 {
    let window = i64::try_from(window_seconds.max(1)).unwrap_or(i64::MAX);
    now.timestamp().div_euclid(window) * window
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.key
    }
}
