// Tiered cache module
// Author: kelexine (https://github.com/kelexine)

pub mod key;
pub mod local;
pub mod models;
pub mod remote;
pub mod tiered;

pub use key::CacheKey;
pub use local::LocalCache;
pub use models::{CacheHit, CacheStats, Tier};
pub use remote::{MemoryRemote, RemoteCache, RemoteValue};
pub use tiered::TieredCache;
