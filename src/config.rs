//! Configuration for the scheduler and the disk-backed cache.
//!
//! Loaded from TOML with serde defaults for every field, then optionally
//! overridden from the environment:
//!
//! | Variable                  | Field                    |
//! |---------------------------|--------------------------|
//! | `QUANTCORE_CACHE_DIR`     | `cache.cache_dir`        |
//! | `QUANTCORE_MAX_MEMORY_MB` | `cache.max_memory_mb`    |
//! | `QUANTCORE_WORKERS`       | `scheduler.workers`      |
//!
//! ```toml
//! [cache]
//! cache_dir = "/var/lib/quantcore/cache"
//! max_memory_mb = 256
//! async_persistence = true
//!
//! [scheduler]
//! workers = 4
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ENV_CACHE_DIR: &str = "QUANTCORE_CACHE_DIR";
pub const ENV_MAX_MEMORY_MB: &str = "QUANTCORE_MAX_MEMORY_MB";
pub const ENV_WORKERS: &str = "QUANTCORE_WORKERS";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QuantcoreConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Disk-backed cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding mirror files and `metadata.json`.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// In-memory budget in MiB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,

    /// Mirror writes go through the scheduler when one is attached.
    #[serde(default = "default_true")]
    pub async_persistence: bool,
}

/// Task scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Worker threads; 0 means host parallelism.
    #[serde(default)]
    pub workers: usize,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}
fn default_max_memory_mb() -> usize {
    100
}
fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            max_memory_mb: default_max_memory_mb(),
            async_persistence: true,
        }
    }
}

impl CacheConfig {
    /// Budget in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Checks the `[cache]` section on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_memory_mb == 0 {
            return Err(ConfigError::Invalid(
                "cache.max_memory_mb must be greater than 0".into(),
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache.cache_dir must not be empty".into()));
        }
        Ok(())
    }
}

impl QuantcoreConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Loads a file, applies environment overrides and validates the result.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Applies `QUANTCORE_*` variables. Unparseable values are logged and skipped.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_CACHE_DIR) {
            self.cache.cache_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_MAX_MEMORY_MB) {
            match raw.parse() {
                Ok(mb) => self.cache.max_memory_mb = mb,
                Err(_) => tracing::warn!(var = ENV_MAX_MEMORY_MB, value = %raw, "ignoring unparseable override"),
            }
        }
        if let Some(raw) = lookup(ENV_WORKERS) {
            match raw.parse() {
                Ok(workers) => self.scheduler.workers = workers,
                Err(_) => tracing::warn!(var = ENV_WORKERS, value = %raw, "ignoring unparseable override"),
            }
        }
    }

    /// Checks parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        if self.scheduler.workers > 1024 {
            return Err(ConfigError::Invalid(format!(
                "scheduler.workers must be at most 1024, got {}",
                self.scheduler.workers
            )));
        }
        Ok(())
    }

    /// Writes the configuration as pretty TOML.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
