//! Local-to-published response relay.
//!
//! A worker emits [`LocalResponse`] values on a private channel and knows
//! nothing about its audience. The relay converts each one into the public
//! [`Response`] form and publishes it on a broadcast channel, so any number
//! of dispatchers attached to the worker observe every response.

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::protocol::{LocalResponse, Response};

/// Spawn the relay task for one worker
pub(crate) fn spawn(
    worker_id: String,
    mut local: mpsc::Receiver<LocalResponse>,
    publish: broadcast::Sender<Response>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(local_response) = local.recv().await {
            let from = local_response.tag();
            let response = Response::from(local_response);
            trace!(
                worker_id = %worker_id,
                from = %from,
                to = %response.tag(),
                key = %response.key,
                "relaying response"
            );
            // send errors only when nobody is subscribed right now
            let _ = publish.send(response);
        }
        debug!(worker_id = %worker_id, "relay stopped");
    })
}
