//! OHLCV time series, the default payload of the disk-backed cache.
//!
//! On disk a series is a JSON object with the symbol and an ordered list of
//! bars; timestamps are epoch seconds:
//!
//! ```json
//! {
//!   "symbol": "AAPL",
//!   "data": [
//!     { "timestamp": 1700000000, "open": 189.1, "high": 190.2,
//!       "low": 188.7, "close": 189.9, "volume": 51230000 }
//!   ]
//! }
//! ```

use std::mem;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::CacheValue;

/// Fixed per-series overhead added to the size estimate.
const SERIES_OVERHEAD_BYTES: usize = 100;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: i64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// `low <= open, close <= high` and a non-negative volume.
    pub fn is_valid(&self) -> bool {
        self.low <= self.high
            && (self.low..=self.high).contains(&self.open)
            && (self.low..=self.high).contains(&self.close)
            && self.volume >= 0
    }
}

/// Named, time-ordered series of bars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    symbol: String,
    #[serde(rename = "data")]
    bars: Vec<Bar>,
}

impl TimeSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::new(),
        }
    }

    pub fn with_capacity(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            bars: Vec::with_capacity(capacity),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first(&self) -> Option<&Bar> {
        self.bars.first()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn push(&mut self, bar: Bar) {
        self.bars.push(bar);
    }

    pub fn clear(&mut self) {
        self.bars.clear();
    }

    /// Bars with `start <= timestamp <= end`, in series order.
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Bar> {
        self.bars
            .iter()
            .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
            .copied()
            .collect()
    }

    /// Every bar is valid and timestamps never decrease.
    pub fn is_valid(&self) -> bool {
        self.bars.iter().all(Bar::is_valid)
            && self
                .bars
                .windows(2)
                .all(|pair| pair[0].timestamp <= pair[1].timestamp)
    }
}

impl Extend<Bar> for TimeSeries {
    fn extend<I: IntoIterator<Item = Bar>>(&mut self, iter: I) {
        self.bars.extend(iter);
    }
}

impl CacheValue for TimeSeries {
    fn estimated_size(&self) -> usize {
        mem::size_of::<Bar>() * self.bars.len()
            + self.symbol.len()
            + mem::size_of::<Vec<Bar>>()
            + SERIES_OVERHEAD_BYTES
    }
}
