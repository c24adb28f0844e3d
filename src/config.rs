//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for the bridge: worker pool
//! size, reply deadlines, handle cache behavior, and engine flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of workers in the pool
pub const DEFAULT_WORKERS: usize = 1;

/// Default reply deadline in milliseconds (0 = wait forever)
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;

/// Default maximum handles cached per store
pub const DEFAULT_CACHE_CAPACITY: usize = 30;

/// Configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Number of workers in the pool (default: 1)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-job reply deadline in milliseconds, 0 disables the deadline
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_ms: u64,

    /// Handle cache behavior
    #[serde(default)]
    pub cache: CacheOptions,

    /// Engine flags applied at load time
    #[serde(default)]
    pub engine: EngineOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            reply_timeout_ms: DEFAULT_REPLY_TIMEOUT_MS,
            cache: CacheOptions::default(),
            engine: EngineOptions::default(),
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the reply deadline in milliseconds (0 disables it)
    pub fn with_reply_timeout(mut self, ms: u64) -> Self {
        self.reply_timeout_ms = ms;
        self
    }

    /// Set the cache options
    pub fn with_cache(mut self, cache: CacheOptions) -> Self {
        self.cache = cache;
        self
    }

    /// Set the engine options
    pub fn with_engine(mut self, engine: EngineOptions) -> Self {
        self.engine = engine;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers".into(),
                reason: "must be greater than 0".into(),
            });
        }

        self.cache.validate()
    }
}

/// Handle cache behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
    /// Keep handles alive between jobs (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Maximum handles per store before a flush (default: 30)
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheOptions {
    /// Caching enabled with the given capacity
    pub fn enabled(capacity: usize) -> Self {
        Self {
            enabled: true,
            capacity,
        }
    }

    /// Caching disabled; every handle is released after its operation
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// Validate the cache options
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.capacity".into(),
                reason: "must be greater than 0 when caching is enabled".into(),
            });
        }

        Ok(())
    }
}

/// Engine flags applied at load time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineOptions {
    /// Prefer the template-based coordinate generator for depiction (default: true)
    #[serde(default = "default_true")]
    pub prefer_coordgen: bool,

    /// Strip explicit hydrogens when building handles (default: true)
    #[serde(default = "default_true")]
    pub remove_hs: bool,

    /// Path to the native engine module (optional, uses the bundled one if absent)
    #[serde(default)]
    pub module_path: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            prefer_coordgen: true,
            remove_hs: true,
            module_path: None,
        }
    }
}

impl EngineOptions {
    /// Set the coordinate generator preference
    pub fn with_prefer_coordgen(mut self, prefer: bool) -> Self {
        self.prefer_coordgen = prefer;
        self
    }

    /// Set hydrogen stripping
    pub fn with_remove_hs(mut self, remove: bool) -> Self {
        self.remove_hs = remove;
        self
    }

    /// Set the engine module path
    pub fn with_module_path(mut self, path: PathBuf) -> Self {
        self.module_path = Some(path);
        self
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_reply_timeout() -> u64 {
    DEFAULT_REPLY_TIMEOUT_MS
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_true() -> bool {
    true
}
