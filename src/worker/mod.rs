//! Worker actor owning an engine and its handle cache.
//!
//! Each worker is a single task consuming one job at a time from an inbound
//! channel. That serialization is what makes the per-worker cache safe to
//! reason about: no two operations on one worker ever interleave. Parallelism
//! comes from running several workers, each with an independent engine and
//! cache.
//!
//! The engine is absent until the first init job loads it through the
//! [`EngineLoader`]; domain jobs arriving before that are answered with an
//! explicit not-ready failure instead of being dropped.

pub mod relay;
pub mod router;

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{ChemEngine, EngineLoader, HandleCache};
use crate::protocol::{Job, LocalResponse, Response};
use router::RouteOutcome;

/// Inbound job channel capacity per worker
const JOB_CHANNEL_CAPACITY: usize = 256;

/// Published response channel capacity per worker
const RESPONSE_CHANNEL_CAPACITY: usize = 256;

/// Engine-dependent state a worker gains after init
pub(crate) struct EngineState<E: ChemEngine> {
    /// Handle ownership for this worker
    pub(crate) cache: HandleCache<E>,
    /// Named source collections for batch screening
    pub(crate) libraries: HashMap<String, Vec<String>>,
}

/// Sending side of a spawned worker
#[derive(Clone)]
pub struct WorkerHandle {
    id: String,
    jobs: mpsc::Sender<Job>,
    responses: broadcast::Sender<Response>,
}

impl WorkerHandle {
    /// Worker id, unique per spawn
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue a job on this worker
    pub async fn send(&self, job: Job) -> crate::error::Result<()> {
        self.jobs
            .send(job)
            .await
            .map_err(|_| crate::error::BridgeError::ChannelClosed)
    }

    /// Subscribe to every response this worker publishes
    pub fn subscribe(&self) -> broadcast::Receiver<Response> {
        self.responses.subscribe()
    }

    /// True once the worker stopped accepting jobs
    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

/// The worker actor; lives inside its spawned task
pub(crate) struct Worker<L: EngineLoader> {
    pub(crate) id: String,
    pub(crate) loader: L,
    pub(crate) state: Option<EngineState<L::Engine>>,
    inbox: mpsc::Receiver<Job>,
    outbound: mpsc::Sender<LocalResponse>,
}

/// Spawn a worker and its relay; returns the handle and the worker task
pub fn spawn<L: EngineLoader>(loader: L) -> (WorkerHandle, JoinHandle<()>) {
    let id = Uuid::new_v4().to_string();
    let (job_tx, job_rx) = mpsc::channel(JOB_CHANNEL_CAPACITY);
    let (local_tx, local_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
    let (publish_tx, _) = broadcast::channel(RESPONSE_CHANNEL_CAPACITY);

    relay::spawn(id.clone(), local_rx, publish_tx.clone());

    let worker = Worker {
        id: id.clone(),
        loader,
        state: None,
        inbox: job_rx,
        outbound: local_tx,
    };
    let task = tokio::spawn(worker.run());

    (
        WorkerHandle {
            id,
            jobs: job_tx,
            responses: publish_tx,
        },
        task,
    )
}

impl<L: EngineLoader> Worker<L> {
    async fn run(mut self) {
        debug!(worker_id = %self.id, "worker started");

        while let Some(job) = self.inbox.recv().await {
            let action = job.action();
            let key = job.key.clone();

            match self.route(job).await {
                RouteOutcome::Respond(outcome) => {
                    let local = LocalResponse {
                        action,
                        key,
                        outcome,
                    };
                    if self.outbound.send(local).await.is_err() {
                        warn!(worker_id = %self.id, "response channel closed, stopping");
                        break;
                    }
                }
                RouteOutcome::Shutdown => break,
            }
        }

        // covers both the terminate job and a dropped job channel
        if let Some(state) = &self.state {
            state.cache.flush_all();
        }
        debug!(worker_id = %self.id, "worker stopped");
    }
}
