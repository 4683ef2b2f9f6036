/// Point-in-time counters and gauges of an [`LruDiskCache`](crate::cache::LruDiskCache).
///
/// `requests` and `hits` include the totals restored from `metadata.json`;
/// the remaining counters cover the current process only.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,

    pub inserts: u64,
    pub replacements: u64,
    pub rejections: u64,
    pub evictions: u64,
    pub removals: u64,
    pub expirations: u64,

    // gauges captured at snapshot time
    pub entries: usize,
    pub memory_bytes: usize,
    pub budget_bytes: usize,
}

impl CacheStats {
    /// `hits / requests`, `0.0` before the first request.
    pub fn hit_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.requests as f64
        }
    }

    /// Fraction of the memory budget in use.
    pub fn utilization(&self) -> f64 {
        if self.budget_bytes == 0 {
            0.0
        } else {
            self.memory_bytes as f64 / self.budget_bytes as f64
        }
    }
}

/// Point-in-time view of a [`TaskScheduler`](crate::runtime::TaskScheduler).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub threads: usize,
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
}
