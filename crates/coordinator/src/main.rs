//! Wampline Coordinator - Main Entry Point
//!
//! Runs a master with an in-process cluster of workers. Each worker waits for
//! its handshake, then calls procedures registered on the master through its
//! master link.

use serde_json::{json, Value};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wampline_common::config::ClientConfig;
use wampline_common::{Result, WamplineConfig, METRICS};
use wampline_coordinator::{EndpointRegistry, LocalCluster, Router, WorkerPort};
use wampline_worker::{MasterLink, WampClient, WorkerSession};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wampline_coordinator=info,wampline_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Wampline Coordinator");

    // Load configuration
    let config = match std::env::var("WAMPLINE_CONFIG") {
        Ok(path) => WamplineConfig::from_file(&path)?,
        Err(_) => WamplineConfig::from_env()?,
    };

    info!(
        "Coordinator configuration loaded: workers={}, request_timeout={:?}",
        config.coordinator.workers,
        config.request_timeout()
    );

    let registry = Arc::new(EndpointRegistry::new());
    registry.register_rpc("math.add", |data: Value| async move {
        match (data["a"].as_i64(), data["b"].as_i64()) {
            (Some(a), Some(b)) => Ok(json!(a + b)),
            _ => Err(json!("a and b must be numbers")),
        }
    });
    registry.register_event("workers.rebalanced", |data| {
        info!("Workers rebalanced: {}", data);
    });

    let (cluster, events) = LocalCluster::new();
    let router = Arc::new(Router::new(
        cluster.clone(),
        registry.clone(),
        Some(config.coordinator.worker_config.clone()),
    ));
    let router_handle = router.clone().run(events);

    let mut workers = Vec::new();
    for _ in 0..config.coordinator.workers {
        let port = cluster.spawn_worker().await?;
        let worker_id = port.worker_id;
        let client_config = config.client.clone();
        workers.push((worker_id, tokio::spawn(run_worker(port, client_config))));
    }

    info!("Wampline Coordinator running");

    let all_done = async {
        for (worker_id, handle) in workers.iter_mut() {
            match handle.await {
                Ok(Ok(())) => info!("Worker {} finished", worker_id),
                Ok(Err(e)) => error!("Worker {} failed: {}", worker_id, e),
                Err(e) => error!("Worker {} panicked: {}", worker_id, e),
            }
        }
    };

    // Wait for the workers or a shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        _ = all_done => {}
    }

    for worker_id in router.live_workers().await {
        if let Err(e) = cluster.exit_worker(worker_id).await {
            warn!("Failed to stop worker {}: {}", worker_id, e);
        }
    }
    router_handle.abort();

    if config.observability.enable_metrics {
        info!("Final metrics:\n{}", METRICS.gather());
    }

    info!("Wampline Coordinator shutdown complete");
    Ok(())
}

/// Worker process body: handshake, then call the master
async fn run_worker(port: WorkerPort, client_config: ClientConfig) -> Result<()> {
    let WorkerPort {
        worker_id,
        mut inbox,
        outbox,
    } = port;

    let session = WorkerSession::receive(&mut inbox).await?;
    let link = MasterLink::new(session, outbox);

    let pump_link = link.clone();
    let pump = tokio::spawn(async move {
        while let Some(message) = inbox.recv().await {
            pump_link.deliver(message);
        }
    });

    let client = WampClient::from_config(&client_config);
    let master = client.upgrade(link);

    let sum = master
        .call("math.add", json!({"a": worker_id, "b": 40}))
        .await?;
    info!("Worker {} got math.add = {}", worker_id, sum);

    match master.call("math.missing", Value::Null).await {
        Ok(value) => warn!("Worker {} unexpectedly got {}", worker_id, value),
        Err(e) => info!("Worker {} got expected error: {}", worker_id, e),
    }

    pump.abort();
    Ok(())
}
