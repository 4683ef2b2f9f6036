//! Snapshot types reported by the cache and the scheduler.

pub mod snapshot;

pub use snapshot::{CacheStats, SchedulerStats};
