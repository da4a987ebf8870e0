// CLI module for tierflight
// Author: kelexine (https://github.com/kelexine)

use crate::config::AppConfig;
use clap::Parser;
use std::path::PathBuf;

/// tierflight - bounded worker pool with a tiered cache and request coalescing
#[derive(Parser, Debug)]
#[command(name = "tierflight", version, about, long_about = None)]
pub struct Args {
    /// Config TOML file path (default: conf/local.toml, optional)
    #[arg(long, env = "TIERFLIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Identity every request is issued for
    #[arg(long)]
    pub identity: Option<String>,

    /// Number of requests to fan out
    #[arg(long)]
    pub requests: Option<usize>,

    /// Number of pool tokens (maximum concurrent workers)
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Return on shutdown without waiting for running workers
    #[arg(long)]
    pub no_wait: bool,

    /// Global deadline for the run in seconds (0 disables it)
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Print Prometheus metrics when the run finishes
    #[arg(long)]
    pub print_metrics: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub dump_config: bool,
}

impl Args {
    /// Apply flag overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(identity) = &self.identity {
            config.run.identity = identity.clone();
        }
        if let Some(requests) = self.requests {
            config.run.requests = requests;
        }
        if let Some(capacity) = self.capacity {
            config.pool.capacity = capacity;
        }
        if self.no_wait {
            config.pool.wait_on_shutdown = false;
        }
        if let Some(deadline) = self.deadline_secs {
            config.run.deadline_seconds = deadline;
        }
    }
}
