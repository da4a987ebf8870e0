// Error types for tierflight
// Author: kelexine (https://github.com/kelexine)

use thiserror::Error;

/// Every failure the pipeline can report to a caller.
///
/// The type is `Clone` because a single coalesced outcome is handed to every
/// waiter on a key, errors included.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    /// A cache tier could not determine presence or absence of a key.
    /// Never to be confused with a confirmed miss.
    #[error("Cache tier failure ({tier}): {message}")]
    CacheTier { tier: &'static str, message: String },

    #[error("Upstream lookup failed: {0}")]
    Upstream(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker fault: {0}")]
    Fault(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dispatcher is shutting down")]
    Shutdown,
}

impl FlightError {
    pub fn remote(message: impl Into<String>) -> Self {
        FlightError::CacheTier {
            tier: "remote",
            message: message.into(),
        }
    }

    /// Short label used for metrics and the `outcome` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            FlightError::CacheTier { .. } => "cache_tier",
            FlightError::Upstream(_) => "upstream",
            FlightError::Cancelled => "cancelled",
            FlightError::Fault(_) => "fault",
            FlightError::Codec(_) => "codec",
            FlightError::Config(_) => "config",
            FlightError::Shutdown => "shutdown",
        }
    }
}

impl From<serde_json::Error> for FlightError {
    fn from(e: serde_json::Error) -> Self {
        FlightError::Codec(e.to_string())
    }
}

impl From<config::ConfigError> for FlightError {
    fn from(e: config::ConfigError) -> Self {
        FlightError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FlightError>;
