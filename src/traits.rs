//! # Cache Value Contract
//!
//! [`LruDiskCache`](crate::cache::LruDiskCache) is generic over the payload it
//! stores. A payload has to do two things for the cache:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                        CacheValue                                │
//!   │                                                                  │
//!   │  estimated_size(&self) -> usize   budget accounting on put       │
//!   │  Serialize + DeserializeOwned     mirror file encode / decode    │
//!   │  Send + Sync + 'static            shared with persistence tasks  │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The estimate only needs to be stable for a given value: the cache records
//! the size at insert time and subtracts exactly that amount on eviction or
//! removal, so `memory_usage()` always equals the sum of recorded sizes.
//!
//! ## Example
//!
//! ```
//! use quantcore::traits::CacheValue;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Quote {
//!     symbol: String,
//!     bid: f64,
//!     ask: f64,
//! }
//!
//! impl CacheValue for Quote {
//!     fn estimated_size(&self) -> usize {
//!         std::mem::size_of::<Self>() + self.symbol.len()
//!     }
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload stored by the disk-backed LRU cache.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Approximate in-memory footprint in bytes, charged against the budget.
    fn estimated_size(&self) -> usize;
}

impl CacheValue for String {
    fn estimated_size(&self) -> usize {
        std::mem::size_of::<String>() + self.len()
    }
}

impl CacheValue for Vec<u8> {
    fn estimated_size(&self) -> usize {
        std::mem::size_of::<Vec<u8>>() + self.len()
    }
}
