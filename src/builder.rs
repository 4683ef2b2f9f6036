//! Builder for [`LruDiskCache`].
//!
//! Collects the budget, directory and persistence mode, then opens the cache
//! in one step.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use quantcore::builder::CacheBuilder;
//! use quantcore::cache::LruDiskCache;
//! use quantcore::runtime::TaskScheduler;
//! use quantcore::series::TimeSeries;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let scheduler = Arc::new(TaskScheduler::new(2).unwrap());
//!
//! let cache: LruDiskCache<TimeSeries> = CacheBuilder::new(64 * 1024 * 1024)
//!     .cache_dir(dir.path())
//!     .scheduler(Arc::clone(&scheduler))
//!     .build()
//!     .unwrap();
//! assert_eq!(cache.memory_budget(), 64 * 1024 * 1024);
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{DiskMirror, LruDiskCache};
use crate::config::CacheConfig;
use crate::error::{ConfigError, PersistError};
use crate::runtime::TaskScheduler;
use crate::traits::CacheValue;

/// Builder for creating disk-backed caches.
#[derive(Debug, Clone)]
pub struct CacheBuilder {
    max_memory_bytes: usize,
    cache_dir: PathBuf,
    scheduler: Option<Arc<TaskScheduler>>,
    async_persistence: bool,
}

impl CacheBuilder {
    /// Starts a builder with the given memory budget and the default
    /// directory (`./cache`).
    pub fn new(max_memory_bytes: usize) -> Self {
        let defaults = CacheConfig::default();
        Self {
            max_memory_bytes,
            cache_dir: defaults.cache_dir,
            scheduler: None,
            async_persistence: defaults.async_persistence,
        }
    }

    /// Starts a builder from the `[cache]` section of the configuration.
    ///
    /// Ranges are checked by [`build`](Self::build).
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_memory_bytes: config.max_memory_bytes(),
            cache_dir: config.cache_dir.clone(),
            scheduler: None,
            async_persistence: config.async_persistence,
        }
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Scheduler used for mirror writes when asynchronous persistence is on.
    pub fn scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// With `false`, mirror writes run on the calling thread even if a
    /// scheduler is set.
    pub fn async_persistence(mut self, enabled: bool) -> Self {
        self.async_persistence = enabled;
        self
    }

    /// Creates the directory and opens the cache.
    ///
    /// A zero budget or an empty directory path is rejected with
    /// [`PersistError::Config`].
    pub fn build<V: CacheValue>(self) -> Result<LruDiskCache<V>, PersistError> {
        if self.max_memory_bytes == 0 {
            return Err(ConfigError::Invalid("cache memory budget must be greater than 0".into()).into());
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache directory must not be empty".into()).into());
        }
        let mirror = DiskMirror::open(self.cache_dir)?;
        Ok(LruDiskCache::from_parts(
            self.max_memory_bytes,
            mirror,
            self.scheduler,
            self.async_persistence,
        ))
    }
}
