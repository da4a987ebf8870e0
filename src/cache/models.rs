//! Cache tier identifiers, lookup results and statistics.

// Author: kelexine (https://github.com/kelexine)

use std::fmt;

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Local,
    Remote,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Remote => "remote",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A serialized entry found in one of the tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHit {
    pub value: String,
    pub tier: Tier,
}

/// Statistics for tiered cache operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the local tier.
    pub local_hits: u64,
    /// Lookups answered by the remote tier.
    pub remote_hits: u64,
    /// Lookups confirmed absent from both tiers.
    pub misses: u64,
    /// Lookups or writes where the remote tier failed.
    pub tier_failures: u64,
    /// Successful writes to both tiers.
    pub writes: u64,
}
