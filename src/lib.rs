// tierflight - Bounded worker pool with a tiered cache and request coalescing
// Author: kelexine (https://github.com/kelexine)

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod flight;
pub mod lookup;
pub mod metrics;
pub mod pool;
pub mod shield;
pub mod utils;
pub mod worker;
