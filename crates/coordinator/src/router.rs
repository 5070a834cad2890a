//! Master-side request routing
//!
//! This module bridges worker lifecycle events into the dispatch registry:
//! joining workers get a one-time configuration handshake, validated worker
//! requests are dispatched, and replies are unicast back to the worker that
//! asked.

use crate::dispatch::Dispatch;
use crate::transport::{ClusterEvent, WorkerTransport};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use wampline_common::error::{Result, WampError};
use wampline_common::METRICS;
use wampline_proto::{MasterConfigRequest, MasterRequest, WorkerId};

/// Router between workers and the dispatch registry
pub struct Router {
    /// Transport used to reach workers
    transport: Arc<dyn WorkerTransport>,

    /// Registry requests are dispatched to
    dispatch: Arc<dyn Dispatch>,

    /// Configuration shared with every joining worker
    config: Map<String, Value>,

    /// Live workers, in join order
    workers: RwLock<Vec<WorkerId>>,
}

impl Router {
    /// Create a new router
    pub fn new(
        transport: Arc<dyn WorkerTransport>,
        dispatch: Arc<dyn Dispatch>,
        config: Option<Map<String, Value>>,
    ) -> Self {
        Self {
            transport,
            dispatch,
            config: config.unwrap_or_default(),
            workers: RwLock::new(Vec::new()),
        }
    }

    /// Greet a joining worker and add it to the live set.
    ///
    /// The handshake carries the event names registered at this moment; names
    /// registered later are not sent to workers that already joined. A worker
    /// whose handshake cannot be delivered is not added.
    pub async fn on_worker_join(&self, worker_id: WorkerId) -> Result<()> {
        let handshake = MasterConfigRequest::new(worker_id, self.dispatch.event_names(), self.config.clone());
        let payload = serde_json::to_value(&handshake)?;

        self.transport.send_to_worker(worker_id, payload).await?;
        METRICS.coordinator.handshakes_sent.inc();

        {
            let mut workers = self.workers.write().await;
            workers.push(worker_id);
            METRICS.coordinator.live_workers.set(workers.len() as i64);
        }

        info!(
            "Registered worker {} with {} events",
            worker_id,
            handshake.registered_events.len()
        );

        Ok(())
    }

    /// Forward a worker message to dispatch when it is a known request.
    ///
    /// Anything else is dropped. The reply, if any, is produced by a spawned
    /// task. Returns whether the message was forwarded.
    pub fn on_worker_message(self: &Arc<Self>, worker_id: WorkerId, message: Value) -> bool {
        let Some(request) = MasterRequest::parse(&message) else {
            METRICS.coordinator.requests_dropped.inc();
            debug!("Dropped invalid message from worker {}", worker_id);
            return false;
        };

        METRICS.coordinator.requests_forwarded.inc();
        debug!(
            "Forwarding {} ({}) from worker {}",
            request.procedure(),
            request.signature(),
            worker_id
        );

        let router = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = router.process_request(request).await {
                warn!("Failed to reply to worker {}: {}", worker_id, e);
            }
        });

        true
    }

    /// Remove a worker from the live set.
    ///
    /// Only the first entry with this identifier is removed. Returns false
    /// when the worker was not live.
    pub async fn on_worker_exit(&self, worker_id: WorkerId) -> bool {
        let mut workers = self.workers.write().await;

        match workers.iter().position(|id| *id == worker_id) {
            Some(index) => {
                workers.remove(index);
                METRICS.coordinator.live_workers.set(workers.len() as i64);
                info!("Unregistered worker {}", worker_id);
                true
            }
            None => {
                debug!("Exit of unknown worker {}", worker_id);
                false
            }
        }
    }

    /// Dispatch a validated request and send its reply
    pub async fn process_request(&self, request: MasterRequest) -> Result<()> {
        match self.dispatch.process(&request).await {
            Some(Ok(data)) => self.reply(&request, None, Some(data)).await,
            Some(Err(error)) => self.reply(&request, Some(error), None).await,
            None => Ok(()),
        }
    }

    /// Send the response to `request` to the worker that issued it.
    ///
    /// A present `error` produces a failed response. Delivery to a worker that
    /// is not live fails with [`WampError::WorkerUnavailable`].
    pub async fn reply(&self, request: &MasterRequest, error: Option<Value>, data: Option<Value>) -> Result<()> {
        let worker_id = request.worker_id();

        let result = self.deliver_reply(worker_id, request, error, data).await;
        match &result {
            Ok(()) => METRICS.coordinator.replies_sent.inc(),
            Err(_) => METRICS.coordinator.replies_failed.inc(),
        }
        result
    }

    async fn deliver_reply(
        &self,
        worker_id: WorkerId,
        request: &MasterRequest,
        error: Option<Value>,
        data: Option<Value>,
    ) -> Result<()> {
        if !self.is_live(worker_id).await {
            return Err(WampError::worker_unavailable(format!("worker {} is not live", worker_id)));
        }

        let response = self.dispatch.build_response(request, error, data);
        let payload = serde_json::to_value(&response)?;
        self.transport.send_to_worker(worker_id, payload).await
    }

    /// Snapshot of the live set
    pub async fn live_workers(&self) -> Vec<WorkerId> {
        self.workers.read().await.clone()
    }

    pub async fn is_live(&self, worker_id: WorkerId) -> bool {
        self.workers.read().await.contains(&worker_id)
    }

    /// Consume cluster events in order until the stream closes
    pub fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ClusterEvent>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ClusterEvent::WorkerStart { worker_id } => {
                        if let Err(e) = self.on_worker_join(worker_id).await {
                            warn!("Handshake with worker {} failed: {}", worker_id, e);
                        }
                    }
                    ClusterEvent::WorkerMessage { worker_id, message } => {
                        self.on_worker_message(worker_id, message);
                    }
                    ClusterEvent::WorkerExit { worker_id } => {
                        self.on_worker_exit(worker_id).await;
                    }
                }
            }

            info!("Cluster event stream closed");
        })
    }
}
