//! Worker transport seen from the master
//!
//! The master only needs to unicast an envelope to a worker and to observe
//! worker lifecycle events. [`LocalCluster`] provides both over in-process
//! channels.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use wampline_common::error::{Result, WampError};
use wampline_proto::WorkerId;

/// Unicast delivery to workers
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Send `payload` to exactly one worker.
    ///
    /// Fails with [`WampError::WorkerUnavailable`] when the worker is unknown
    /// or gone.
    async fn send_to_worker(&self, worker_id: WorkerId, payload: Value) -> Result<()>;
}

/// Worker lifecycle and traffic, delivered serially to the master
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    WorkerStart { worker_id: WorkerId },
    WorkerMessage { worker_id: WorkerId, message: Value },
    WorkerExit { worker_id: WorkerId },
}

/// Worker end of a [`LocalCluster`] connection
#[derive(Debug)]
pub struct WorkerPort {
    pub worker_id: WorkerId,

    /// Messages the master sends to this worker
    pub inbox: mpsc::UnboundedReceiver<Value>,

    /// Messages this worker sends to the master
    pub outbox: mpsc::UnboundedSender<Value>,
}

/// In-process cluster of workers
pub struct LocalCluster {
    workers: RwLock<HashMap<WorkerId, mpsc::UnboundedSender<Value>>>,
    events: mpsc::UnboundedSender<ClusterEvent>,
    next_id: AtomicU32,
}

impl LocalCluster {
    /// Create a cluster and the event stream the master consumes
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClusterEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let cluster = Arc::new(Self {
            workers: RwLock::new(HashMap::new()),
            events,
            next_id: AtomicU32::new(1),
        });
        (cluster, rx)
    }

    /// Start a worker and announce it to the master
    pub async fn spawn_worker(&self) -> Result<WorkerPort> {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (to_worker, inbox) = mpsc::unbounded_channel();
        let (outbox, mut from_worker) = mpsc::unbounded_channel::<Value>();

        {
            let mut workers = self.workers.write().await;
            workers.insert(worker_id, to_worker);
        }

        self.publish(ClusterEvent::WorkerStart { worker_id })?;

        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(message) = from_worker.recv().await {
                if events.send(ClusterEvent::WorkerMessage { worker_id, message }).is_err() {
                    break;
                }
            }
            debug!("Worker {} outbox closed", worker_id);
        });

        info!("Spawned worker {}", worker_id);

        Ok(WorkerPort {
            worker_id,
            inbox,
            outbox,
        })
    }

    /// Stop delivering to a worker and announce its exit
    pub async fn exit_worker(&self, worker_id: WorkerId) -> Result<()> {
        let removed = {
            let mut workers = self.workers.write().await;
            workers.remove(&worker_id)
        };

        if removed.is_none() {
            return Err(WampError::worker_unavailable(format!("unknown worker {}", worker_id)));
        }

        info!("Worker {} exited", worker_id);
        self.publish(ClusterEvent::WorkerExit { worker_id })
    }

    /// Number of workers currently attached
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    fn publish(&self, event: ClusterEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| WampError::channel_closed("master stopped consuming cluster events"))
    }
}

#[async_trait]
impl WorkerTransport for LocalCluster {
    async fn send_to_worker(&self, worker_id: WorkerId, payload: Value) -> Result<()> {
        let workers = self.workers.read().await;
        let worker = workers
            .get(&worker_id)
            .ok_or_else(|| WampError::worker_unavailable(format!("unknown worker {}", worker_id)))?;

        worker
            .send(payload)
            .map_err(|_| WampError::worker_unavailable(format!("worker {} is gone", worker_id)))
    }
}
