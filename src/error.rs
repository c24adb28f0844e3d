//! Error types for the bridge.
//!
//! This module defines failure codes carried inside responses, the engine
//! error split (allocation vs everything else), and the main error type
//! returned to callers.

use serde::{Deserialize, Serialize};

/// Failure codes for categorizing job failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Engine ran out of native memory while building a handle
    AllocationFailure,
    /// Job arrived before the engine finished loading
    NotReady,
    /// Input rejected before reaching the engine (bad notation, empty source)
    InvalidInput,
    /// Named source library does not exist on this worker
    UnknownLibrary,
    /// Worker is shutting down
    Terminated,
    /// Internal bridge error (bug)
    InternalError,
    /// Serialization/deserialization error
    SerializationError,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::AllocationFailure => write!(f, "ALLOCATION_FAILURE"),
            FailureKind::NotReady => write!(f, "NOT_READY"),
            FailureKind::InvalidInput => write!(f, "INVALID_INPUT"),
            FailureKind::UnknownLibrary => write!(f, "UNKNOWN_LIBRARY"),
            FailureKind::Terminated => write!(f, "TERMINATED"),
            FailureKind::InternalError => write!(f, "INTERNAL_ERROR"),
            FailureKind::SerializationError => write!(f, "SERIALIZATION_ERROR"),
        }
    }
}

/// Failure details carried inside a response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    /// Failure code
    pub kind: FailureKind,

    /// Human-readable message
    pub message: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl JobFailure {
    /// Create a new job failure
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
        }
    }

    /// Create a not-ready failure
    pub fn not_ready() -> Self {
        Self::new(
            FailureKind::NotReady,
            "engine is not initialized on this worker",
        )
    }

    /// Create an allocation failure
    pub fn allocation_failure(detail: impl Into<String>) -> Self {
        Self::new(
            FailureKind::AllocationFailure,
            format!("handle allocation failed after cache flush: {}", detail.into()),
        )
    }

    /// Create an invalid input failure
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidInput, message)
    }

    /// Create an unknown library failure
    pub fn unknown_library(name: impl Into<String>) -> Self {
        Self::new(
            FailureKind::UnknownLibrary,
            format!("source library '{}' not found", name.into()),
        )
    }

    /// Create an internal error failure
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InternalError, message)
    }

    /// Add context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for JobFailure {}

/// Errors surfaced by the engine trait.
///
/// Only `Allocation` triggers the cache's flush-and-retry path. A source
/// string the engine cannot parse is not an error at all; constructors
/// return `Ok(None)` for those.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Native allocation failed (out of engine memory)
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Engine bootstrap failed
    #[error("engine load failed: {0}")]
    Load(String),

    /// An operation on a live handle failed
    #[error("engine operation failed: {0}")]
    Operation(String),
}

impl EngineError {
    /// True when the error is a recoverable allocation failure
    pub fn is_allocation(&self) -> bool {
        matches!(self, EngineError::Allocation(_))
    }
}

impl From<EngineError> for JobFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Allocation(msg) => JobFailure::allocation_failure(msg),
            other => JobFailure::internal_error(other.to_string()),
        }
    }
}

/// Main error type returned to bridge callers
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// No workers are running, or the pool is empty
    #[error("bridge not ready: {0}")]
    NotReady(String),

    /// The reply deadline elapsed before a matching response arrived
    #[error("no response within {0}ms")]
    Timeout(u64),

    /// The worker's inbound channel or the response channel is gone
    #[error("worker channel closed")]
    ChannelClosed,

    /// The worker processed the job and reported a failure
    #[error("job failed: {0}")]
    Job(#[from] JobFailure),

    /// Engine error outside the job path (bootstrap)
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// Convert to a failure payload for embedding in a response
    pub fn to_failure(&self) -> JobFailure {
        match self {
            BridgeError::NotReady(msg) => {
                JobFailure::new(FailureKind::NotReady, msg.clone())
            }
            BridgeError::Timeout(ms) => JobFailure::new(
                FailureKind::InternalError,
                format!("no response within {}ms", ms),
            ),
            BridgeError::ChannelClosed => {
                JobFailure::new(FailureKind::Terminated, "worker channel closed")
            }
            BridgeError::Job(f) => f.clone(),
            BridgeError::Engine(e) => e.clone().into(),
            BridgeError::Config(e) => JobFailure::invalid_input(e.to_string()),
            BridgeError::Serialization(msg) => {
                JobFailure::new(FailureKind::SerializationError, msg.clone())
            }
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::NotReady.to_string(), "NOT_READY");
        assert_eq!(
            FailureKind::AllocationFailure.to_string(),
            "ALLOCATION_FAILURE"
        );
    }

    #[test]
    fn test_job_failure_creation() {
        let f = JobFailure::unknown_library("actives");
        assert_eq!(f.kind, FailureKind::UnknownLibrary);
        assert!(f.message.contains("actives"));
    }

    #[test]
    fn test_job_failure_serialization() {
        let f = JobFailure::not_ready();
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains("NOT_READY"));
    }

    #[test]
    fn test_engine_error_allocation_flag() {
        assert!(EngineError::Allocation("oom".into()).is_allocation());
        assert!(!EngineError::Operation("bad".into()).is_allocation());
    }

    #[test]
    fn test_bridge_error_to_failure() {
        let err = BridgeError::Engine(EngineError::Allocation("oom".into()));
        assert_eq!(err.to_failure().kind, FailureKind::AllocationFailure);

        let err = BridgeError::NotReady("no workers".into());
        assert_eq!(err.to_failure().kind, FailureKind::NotReady);
    }
}
