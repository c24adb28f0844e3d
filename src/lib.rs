//! # ChemBridge
//!
//! Asynchronous bridge to a long-lived chemistry toolkit running behind a
//! pool of workers. Callers hand the bridge self-describing jobs; each worker
//! owns an engine and a bounded handle cache, and publishes tagged responses
//! that the dispatcher correlates back to waiters by `(action, key)`.
//!
//! ## Architecture
//!
//! ```text
//! Caller (typed methods on ChemBridge)
//!     │
//!     │ Job { actionType, key, payload }
//!     ▼
//! JobDispatcher ─ pending: (action, key) → waiter
//!     │                          ▲
//!     │ mpsc (per worker)        │ broadcast
//!     ▼                          │
//! Worker ── router ── relay ─────┘
//!     │
//!     ▼
//! ChemEngine (handle cache: plain + query stores)
//! ```
//!
//! ## Features
//!
//! - **Correlated dispatch**: a response matches its waiter by action and
//!   key; the first match wins and duplicates are dropped
//! - **Handle caching**: per-worker bounded stores with whole-store flush
//!   and one retry after an engine allocation failure
//! - **Round-robin pooling**: stateless jobs spread across workers, while
//!   library jobs stick to the worker owning the named library
//! - **Cooperative shutdown**: terminate flushes caches and stops workers
//!   without emitting a response

#![deny(missing_docs)]

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod worker;

// Re-export commonly used types
pub use bridge::{init_tracing, ChemBridge};
pub use config::{BridgeConfig, CacheOptions, EngineOptions};
pub use dispatch::JobDispatcher;
pub use error::{BridgeError, FailureKind, JobFailure, Result};
pub use metrics::{BridgeStats, MetricsCollector};
pub use protocol::{
    ActionTag, DrawingOptions, Job, JobOutput, JobPayload, LibraryStatus, MatchMapping,
    MoleculeStats, Notation, Response,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }
}
