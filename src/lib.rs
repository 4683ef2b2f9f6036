//! quantcore: concurrency and resource-management primitives for market-data
//! pipelines.
//!
//! - [`ds::BoundedSpscQueue`]: lock-free single-producer/single-consumer ring.
//! - [`ds::BlockPool`]: thread-safe fixed-size block pool.
//! - [`runtime::TaskScheduler`]: worker pool returning per-task handles.
//! - [`cache::LruDiskCache`]: byte-budgeted LRU cache mirrored to disk.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod builder;
pub mod cache;
pub mod config;
pub mod ds;
pub mod error;
pub mod metrics;
pub mod prelude;
pub mod runtime;
pub mod series;
pub mod traits;
