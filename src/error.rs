//! Error types for the quantcore library.
//!
//! ## Key Components
//!
//! - [`PoolError`]: Returned when a [`BlockPool`](crate::ds::BlockPool) is
//!   constructed with invalid parameters.
//! - [`SchedulerError`]: Returned synchronously to the submitter when the
//!   [`TaskScheduler`](crate::runtime::TaskScheduler) cannot accept work.
//! - [`TaskError`]: Delivered through a [`TaskHandle`](crate::runtime::TaskHandle)
//!   when the task itself failed.
//! - [`PersistError`]: Disk mirror failures, plus invalid parameters when a
//!   cache is opened. Only opening and `flush_metadata` return them; other
//!   cache operations log them and keep serving from memory.
//! - [`ConfigError`]: Returned when configuration cannot be loaded or is invalid.
//!
//! Capacity conditions (queue full or empty, pool exhaustion, cache over budget)
//! are not errors and are reported through `Result<(), T>`, `Option` or outcome
//! enums instead.
//!
//! ## Example Usage
//!
//! ```
//! use quantcore::ds::BlockPool;
//! use quantcore::error::PoolError;
//!
//! let bad = BlockPool::new(0, 4);
//! assert!(matches!(bad, Err(PoolError::InvalidBlockSize)));
//! ```

use std::io;

use thiserror::Error;

// ---------------------------------------------------------------------------
// PoolError
// ---------------------------------------------------------------------------

/// Error returned when a block pool is configured with invalid parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Block size must be greater than zero.
    #[error("block size must be greater than 0")]
    InvalidBlockSize,
}

// ---------------------------------------------------------------------------
// SchedulerError
// ---------------------------------------------------------------------------

/// Error returned by [`TaskScheduler`](crate::runtime::TaskScheduler) operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// `submit` was called after `shutdown`.
    #[error("submit on stopped task scheduler")]
    ShutDown,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),
}

// ---------------------------------------------------------------------------
// TaskError
// ---------------------------------------------------------------------------

/// Failure of a single submitted task, observed by its waiter only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked; carries the panic message when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped without producing a result.
    #[error("task dropped before completion")]
    Disconnected,

    /// `get_timeout` elapsed before the task finished.
    #[error("timed out waiting for task")]
    Timeout,
}

// ---------------------------------------------------------------------------
// PersistError
// ---------------------------------------------------------------------------

/// Disk mirror failure (read, write, encode or decode).
#[derive(Debug, Error)]
pub enum PersistError {
    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A file name could not be mapped back to a cache key.
    #[error("invalid cache file name: {0}")]
    InvalidFileName(String),

    /// The cache was asked to open with unusable parameters.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Error returned when configuration loading or validation fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    #[error("failed to access config file: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid TOML for [`QuantcoreConfig`](crate::config::QuantcoreConfig).
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be serialized.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A parameter is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
