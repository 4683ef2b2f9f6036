//! Thread-pool runtime used for background work such as cache persistence.

pub mod scheduler;

pub use scheduler::{TaskHandle, TaskScheduler};
