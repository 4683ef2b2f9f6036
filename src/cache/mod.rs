//! Disk-backed LRU cache and its file mirror.

pub mod disk;
pub mod lru_disk;

pub use disk::{CacheMetadata, DiskMirror};
pub use lru_disk::{EntryInfo, LruDiskCache, PutOutcome};
