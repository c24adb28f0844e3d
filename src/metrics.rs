//! Dispatch metrics for monitoring and observability.
//!
//! Counters live on the dispatcher's hot path, so everything here is atomic
//! or behind a short-lived lock. Per-worker cache statistics stay inside the
//! workers; this module only sees what crosses the dispatch boundary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::protocol::ActionTag;

/// Point-in-time statistics for a running bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStats {
    /// Workers in the pool
    pub workers: usize,

    /// Jobs posted to workers
    pub jobs_dispatched: u64,

    /// Jobs answered with a success payload
    pub jobs_completed: u64,

    /// Jobs answered with a failure
    pub jobs_failed: u64,

    /// Jobs whose reply deadline elapsed
    pub jobs_timed_out: u64,

    /// Responses that arrived after their waiter was gone
    pub unclaimed_responses: u64,

    /// Jobs currently awaiting a response
    pub jobs_in_flight: usize,

    /// Average reply round-trip in microseconds
    pub avg_reply_time_us: f64,
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self {
            workers: 0,
            jobs_dispatched: 0,
            jobs_completed: 0,
            jobs_failed: 0,
            jobs_timed_out: 0,
            unclaimed_responses: 0,
            jobs_in_flight: 0,
            avg_reply_time_us: 0.0,
        }
    }
}

/// Metrics collector for aggregating dispatch counters
pub struct MetricsCollector {
    jobs_dispatched: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_timed_out: AtomicU64,
    unclaimed_responses: AtomicU64,
    total_reply_time_us: AtomicU64,
    replies_timed: AtomicU64,
    jobs_by_action: parking_lot::Mutex<HashMap<&'static str, u64>>,
    failures_by_kind: parking_lot::Mutex<HashMap<String, u64>>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            jobs_dispatched: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            unclaimed_responses: AtomicU64::new(0),
            total_reply_time_us: AtomicU64::new(0),
            replies_timed: AtomicU64::new(0),
            jobs_by_action: parking_lot::Mutex::new(HashMap::new()),
            failures_by_kind: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a job posted to a worker
    pub fn record_dispatched(&self, action: ActionTag) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
        let mut by_action = self.jobs_by_action.lock();
        *by_action.entry(action.as_str()).or_insert(0) += 1;
    }

    /// Record a completed reply round-trip
    pub fn record_reply(&self, success: bool, elapsed: Duration) {
        if success {
            self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.total_reply_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.replies_timed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure code carried in a response
    pub fn record_failure_kind(&self, kind: &str) {
        let mut counts = self.failures_by_kind.lock();
        *counts.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record an elapsed reply deadline
    pub fn record_timeout(&self) {
        self.jobs_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a response that found no waiter
    pub fn record_unclaimed(&self) {
        self.unclaimed_responses.fetch_add(1, Ordering::Relaxed);
    }

    /// Jobs posted to workers
    pub fn jobs_dispatched(&self) -> u64 {
        self.jobs_dispatched.load(Ordering::Relaxed)
    }

    /// Jobs answered successfully
    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    /// Jobs answered with a failure
    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Jobs whose reply deadline elapsed
    pub fn jobs_timed_out(&self) -> u64 {
        self.jobs_timed_out.load(Ordering::Relaxed)
    }

    /// Responses that found no waiter
    pub fn unclaimed_responses(&self) -> u64 {
        self.unclaimed_responses.load(Ordering::Relaxed)
    }

    /// Average reply round-trip in microseconds
    pub fn avg_reply_time_us(&self) -> f64 {
        let timed = self.replies_timed.load(Ordering::Relaxed);
        if timed == 0 {
            0.0
        } else {
            self.total_reply_time_us.load(Ordering::Relaxed) as f64 / timed as f64
        }
    }

    /// Per-action dispatch counts
    pub fn jobs_by_action(&self) -> HashMap<&'static str, u64> {
        self.jobs_by_action.lock().clone()
    }

    /// Failure counts by failure code
    pub fn failures_by_kind(&self) -> HashMap<String, u64> {
        self.failures_by_kind.lock().clone()
    }

    /// Assemble a snapshot, with pool and in-flight sizes supplied by the
    /// dispatcher
    pub fn snapshot(&self, workers: usize, jobs_in_flight: usize) -> BridgeStats {
        BridgeStats {
            workers,
            jobs_dispatched: self.jobs_dispatched(),
            jobs_completed: self.jobs_completed(),
            jobs_failed: self.jobs_failed(),
            jobs_timed_out: self.jobs_timed_out(),
            unclaimed_responses: self.unclaimed_responses(),
            jobs_in_flight,
            avg_reply_time_us: self.avg_reply_time_us(),
        }
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.jobs_dispatched.store(0, Ordering::Relaxed);
        self.jobs_completed.store(0, Ordering::Relaxed);
        self.jobs_failed.store(0, Ordering::Relaxed);
        self.jobs_timed_out.store(0, Ordering::Relaxed);
        self.unclaimed_responses.store(0, Ordering::Relaxed);
        self.total_reply_time_us.store(0, Ordering::Relaxed);
        self.replies_timed.store(0, Ordering::Relaxed);
        self.jobs_by_action.lock().clear();
        self.failures_by_kind.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP chembridge_jobs_total Jobs by reply status\n");
        output.push_str("# TYPE chembridge_jobs_total counter\n");
        output.push_str(&format!(
            "chembridge_jobs_total{{status=\"completed\"}} {}\n",
            self.jobs_completed()
        ));
        output.push_str(&format!(
            "chembridge_jobs_total{{status=\"failed\"}} {}\n",
            self.jobs_failed()
        ));
        output.push_str(&format!(
            "chembridge_jobs_total{{status=\"timed_out\"}} {}\n",
            self.jobs_timed_out()
        ));

        output.push_str("\n# HELP chembridge_jobs_dispatched_total Jobs posted to workers\n");
        output.push_str("# TYPE chembridge_jobs_dispatched_total counter\n");
        output.push_str(&format!(
            "chembridge_jobs_dispatched_total {}\n",
            self.jobs_dispatched()
        ));

        output.push_str("\n# HELP chembridge_unclaimed_responses_total Responses with no waiter\n");
        output.push_str("# TYPE chembridge_unclaimed_responses_total counter\n");
        output.push_str(&format!(
            "chembridge_unclaimed_responses_total {}\n",
            self.unclaimed_responses()
        ));

        output.push_str("\n# HELP chembridge_reply_time_us Average reply round-trip\n");
        output.push_str("# TYPE chembridge_reply_time_us gauge\n");
        output.push_str(&format!(
            "chembridge_reply_time_us {:.2}\n",
            self.avg_reply_time_us()
        ));

        output.push_str("\n# HELP chembridge_jobs_by_action_total Dispatches per action\n");
        output.push_str("# TYPE chembridge_jobs_by_action_total counter\n");
        for (action, count) in self.jobs_by_action() {
            output.push_str(&format!(
                "chembridge_jobs_by_action_total{{action=\"{}\"}} {}\n",
                action, count
            ));
        }

        output.push_str("\n# HELP chembridge_failures_total Failures by code\n");
        output.push_str("# TYPE chembridge_failures_total counter\n");
        for (kind, count) in self.failures_by_kind() {
            output.push_str(&format!(
                "chembridge_failures_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
