//! Job dispatch and response correlation.
//!
//! One dispatcher fronts the worker pool. A job's in-flight identity is its
//! `(action, key)` pair: sending parks a oneshot sender under that identity,
//! posts the job, and a per-worker listener completes the sender when the
//! matching response is published. The first response removes the entry;
//! anything arriving for the same identity later finds no waiter and is
//! counted and dropped.

pub mod pool;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::{BridgeError, Result};
use crate::metrics::MetricsCollector;
use crate::protocol::{ActionTag, Job, JobPayload, Response};
use crate::worker::WorkerHandle;

use pool::WorkerPool;

/// In-flight identity of a job
type PendingKey = (ActionTag, String);

struct DispatcherInner {
    pool: WorkerPool,
    pending: DashMap<PendingKey, oneshot::Sender<Response>>,
    metrics: Arc<MetricsCollector>,
    reply_timeout_ms: u64,
}

/// Correlates worker responses with the jobs that caused them
pub struct JobDispatcher {
    inner: Arc<DispatcherInner>,
    listeners: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl JobDispatcher {
    /// Front a pool, listening on every worker's response channel
    pub fn new(pool: WorkerPool, reply_timeout_ms: u64, metrics: Arc<MetricsCollector>) -> Self {
        let inner = Arc::new(DispatcherInner {
            pool,
            pending: DashMap::new(),
            metrics,
            reply_timeout_ms,
        });

        let mut listeners = Vec::with_capacity(inner.pool.len());
        for worker in inner.pool.workers() {
            listeners.push(spawn_listener(
                worker.id().to_string(),
                worker.subscribe(),
                Arc::clone(&inner),
            ));
        }

        Self {
            inner,
            listeners: parking_lot::Mutex::new(listeners),
        }
    }

    /// The pool behind the dispatcher
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// Dispatch counters
    pub fn metrics(&self) -> &MetricsCollector {
        &self.inner.metrics
    }

    /// Jobs currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Post a job to the next worker in round-robin order and await the
    /// matching response
    #[instrument(skip(self, job), fields(action = %job.action(), key = %job.key))]
    pub async fn send(&self, job: Job) -> Result<Response> {
        let Some(worker) = self.inner.pool.next() else {
            return Err(BridgeError::NotReady("worker pool is empty".into()));
        };
        self.send_via(worker, job).await
    }

    /// Post a job to one fixed worker and await the matching response
    #[instrument(skip(self, job), fields(worker = index, action = %job.action(), key = %job.key))]
    pub async fn send_to(&self, index: usize, job: Job) -> Result<Response> {
        let worker = self
            .inner
            .pool
            .get(index)
            .ok_or_else(|| BridgeError::NotReady(format!("no worker at index {}", index)))?;
        self.send_via(worker, job).await
    }

    /// Post a job without registering a waiter
    pub async fn notify(&self, worker: &WorkerHandle, job: Job) -> Result<()> {
        worker.send(job).await
    }

    async fn send_via(&self, worker: &WorkerHandle, job: Job) -> Result<Response> {
        let identity: PendingKey = (job.action(), job.key.clone());
        let (tx, rx) = oneshot::channel();
        if self.inner.pending.insert(identity.clone(), tx).is_some() {
            warn!(
                action = %identity.0,
                key = %identity.1,
                "correlation key reused while in flight, old waiter dropped"
            );
        }
        self.inner.metrics.record_dispatched(identity.0);
        let started = Instant::now();

        trace!(
            worker_id = %worker.id(),
            action = %identity.0,
            key = %identity.1,
            "job posted"
        );
        if let Err(err) = worker.send(job).await {
            self.inner.pending.remove(&identity);
            return Err(err);
        }

        let response = if self.inner.reply_timeout_ms > 0 {
            let deadline = Duration::from_millis(self.inner.reply_timeout_ms);
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(response)) => response,
                Ok(Err(_)) => return Err(BridgeError::ChannelClosed),
                Err(_) => {
                    // nobody will claim this entry anymore
                    self.inner.pending.remove(&identity);
                    self.inner.metrics.record_timeout();
                    warn!(
                        action = %identity.0,
                        key = %identity.1,
                        timeout_ms = self.inner.reply_timeout_ms,
                        "reply deadline elapsed"
                    );
                    return Err(BridgeError::Timeout(self.inner.reply_timeout_ms));
                }
            }
        } else {
            rx.await.map_err(|_| BridgeError::ChannelClosed)?
        };

        self.inner
            .metrics
            .record_reply(response.is_success(), started.elapsed());
        if let Some(failure) = &response.error {
            self.inner
                .metrics
                .record_failure_kind(&failure.kind.to_string());
        }
        Ok(response)
    }

    /// Send terminate to every worker, await their exit, and fail the
    /// remaining waiters; repeat calls are harmless
    pub async fn shutdown(&self) {
        info!(workers = self.inner.pool.len(), "terminating workers");
        for worker in self.inner.pool.workers() {
            if let Err(err) = worker.send(Job::new(JobPayload::Terminate)).await {
                debug!(worker_id = %worker.id(), error = %err, "worker already stopped");
            }
        }
        self.inner.pool.join_all().await;

        // the worker handles keep the broadcast channels open, so listeners
        // are stopped rather than joined
        let listeners: Vec<_> = self.listeners.lock().drain(..).collect();
        for listener in listeners {
            listener.abort();
        }

        // dropping the parked senders wakes every waiter with a closed error
        self.inner.pending.clear();
        info!("dispatcher shut down");
    }
}

fn spawn_listener(
    worker_id: String,
    mut responses: broadcast::Receiver<Response>,
    inner: Arc<DispatcherInner>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match responses.recv().await {
                Ok(response) => {
                    let identity = (response.action, response.key.clone());
                    match inner.pending.remove(&identity) {
                        Some((_, waiter)) => {
                            trace!(
                                worker_id = %worker_id,
                                tag = %response.tag(),
                                key = %identity.1,
                                "response claimed"
                            );
                            let _ = waiter.send(response);
                        }
                        None => {
                            inner.metrics.record_unclaimed();
                            debug!(
                                worker_id = %worker_id,
                                tag = %response.tag(),
                                key = %identity.1,
                                "response had no waiter, dropped"
                            );
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        worker_id = %worker_id,
                        skipped = skipped,
                        "listener lagged, responses lost"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(worker_id = %worker_id, "response channel closed, listener exiting");
                    break;
                }
            }
        }
    })
}
