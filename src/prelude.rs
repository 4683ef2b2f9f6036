pub use crate::builder::CacheBuilder;
pub use crate::cache::{EntryInfo, LruDiskCache, PutOutcome};
pub use crate::config::{CacheConfig, QuantcoreConfig, SchedulerConfig};
pub use crate::ds::{
    BlockHandle, BlockPool, BoundedSpscQueue, Consumer, PooledBlock, Producer, RecencyList,
};
pub use crate::error::{ConfigError, PersistError, PoolError, SchedulerError, TaskError};
pub use crate::metrics::{CacheStats, SchedulerStats};
pub use crate::runtime::{TaskHandle, TaskScheduler};
pub use crate::series::{Bar, TimeSeries};
pub use crate::traits::CacheValue;
