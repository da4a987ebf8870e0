//! Configuration data structures for tierflight.
//!
//! This module defines the schema for the application settings: the token
//! pool, both cache tiers, the simulated lookup, logging, and the batch run
//! performed by the binary.
//!
//! Author: kelexine (<https://github.com/kelexine>)

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The root configuration object for the application.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Token pool and dispatcher settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Local and remote cache tier settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Simulated upstream lookup settings.
    #[serde(default)]
    pub lookup: LookupConfig,

    /// Logging and observability settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// The batch the binary dispatches on startup.
    #[serde(default)]
    pub run: RunConfig,
}

/// Settings for the token pool and the dispatcher loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of tokens, i.e. the maximum number of concurrently running workers.
    /// Default: `200`
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Whether the dispatcher waits for every outstanding worker before returning.
    /// Default: `true`
    #[serde(default = "default_true")]
    pub wait_on_shutdown: bool,

    /// Upper bound on the drain wait, in seconds. `0` waits for every
    /// worker however long it takes.
    /// Default: `30`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    /// Number of tokio worker threads.
    /// Default: Number of logical CPU cores.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

/// Settings for the two cache tiers and key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum entries held by the in-process LRU tier.
    /// Default: `1024`
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,

    /// Expiry of local entries, in seconds.
    /// Default: `5`
    #[serde(default = "default_ttl")]
    pub local_ttl_seconds: u64,

    /// TTL passed to the remote tier on every write, in seconds.
    /// Default: `5`
    #[serde(default = "default_ttl")]
    pub remote_ttl_seconds: u64,

    /// Prefix prepended to every cache key.
    /// Default: `user_domain:`
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Width of the time quantization window, in seconds.
    /// Default: `1`
    #[serde(default = "default_window")]
    pub window_seconds: u64,

    /// Artificial round-trip latency of the in-process remote tier, in milliseconds.
    /// Default: `0`
    #[serde(default)]
    pub remote_latency_ms: u64,
}

/// Settings for the simulated expensive lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    /// How long each lookup takes, in milliseconds.
    /// Default: `0`
    #[serde(default)]
    pub latency_ms: u64,

    /// Values returned by every lookup.
    /// Default: empty
    #[serde(default)]
    pub response: Vec<String>,
}

/// Settings for application logging and output format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum log level (`trace`, `debug`, `info`, `warn`, `error`).
    /// Default: `info`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format for logs (`pretty`, `json`, `compact`).
    /// Default: `pretty`
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// The batch of requests the binary fans out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Identity every request is issued for.
    /// Default: `123`
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Number of requests to submit.
    /// Default: `200`
    #[serde(default = "default_requests")]
    pub requests: usize,

    /// Global deadline for the whole run, in seconds. `0` disables it.
    /// Default: `30`
    #[serde(default = "default_deadline")]
    pub deadline_seconds: u64,
}

impl PoolConfig {
    /// `None` when the drain wait is unbounded.
    pub fn shutdown_timeout(&self) -> Option<Duration> {
        (self.shutdown_timeout_seconds > 0)
            .then(|| Duration::from_secs(self.shutdown_timeout_seconds))
    }
}

impl CacheConfig {
    pub fn local_ttl(&self) -> Duration {
        Duration::from_secs(self.local_ttl_seconds)
    }

    pub fn remote_ttl(&self) -> Duration {
        Duration::from_secs(self.remote_ttl_seconds)
    }

    pub fn remote_latency(&self) -> Duration {
        Duration::from_millis(self.remote_latency_ms)
    }
}

impl LookupConfig {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.deadline_seconds > 0).then(|| Duration::from_secs(self.deadline_seconds))
    }
}

// Default trait implementations linking to custom logic

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            wait_on_shutdown: true,
            shutdown_timeout_seconds: default_shutdown_timeout(),
            worker_threads: default_worker_threads(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            local_ttl_seconds: default_ttl(),
            remote_ttl_seconds: default_ttl(),
            key_prefix: default_key_prefix(),
            window_seconds: default_window(),
            remote_latency_ms: 0,
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            response: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            identity: default_identity(),
            requests: default_requests(),
            deadline_seconds: default_deadline(),
        }
    }
}

// Helper functions for serde defaults
fn default_capacity() -> usize {
    200
}

fn default_true() -> bool {
    true
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_local_capacity() -> usize {
    1024
}

fn default_ttl() -> u64 {
    5
}

fn default_key_prefix() -> String {
    "user_domain:".to_string()
}

fn default_window() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_identity() -> String {
    "123".to_string()
}

fn default_requests() -> usize {
    200
}

fn default_deadline() -> u64 {
    30
}
