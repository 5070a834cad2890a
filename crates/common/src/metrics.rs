//! Metrics collection for Wampline
//!
//! This module provides Prometheus metrics for the caller and the master.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry};
use std::sync::Arc;

/// Metrics registry for Wampline
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub client: ClientMetrics,
    pub coordinator: CoordinatorMetrics,
}

/// Caller metrics
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    /// Calls emitted on a socket
    pub calls_total: IntCounter,

    /// Calls resolved with `success: true`
    pub calls_succeeded: IntCounter,

    /// Calls rejected by the peer
    pub calls_failed: IntCounter,

    /// Calls that hit the request timeout
    pub calls_timed_out: IntCounter,

    /// Calls refused before anything was sent
    pub calls_rejected: IntCounter,

    /// Responses that matched no pending call
    pub correlation_faults: IntCounter,

    /// Calls currently awaiting a response
    pub pending_calls: IntGauge,
}

/// Master metrics
#[derive(Debug, Clone)]
pub struct CoordinatorMetrics {
    /// Workers currently in the live set
    pub live_workers: IntGauge,

    /// Handshakes delivered to joining workers
    pub handshakes_sent: IntCounter,

    /// Worker requests forwarded to dispatch
    pub requests_forwarded: IntCounter,

    /// Worker messages dropped by validation
    pub requests_dropped: IntCounter,

    /// Responses delivered to workers
    pub replies_sent: IntCounter,

    /// Responses that could not be delivered
    pub replies_failed: IntCounter,
}

lazy_static! {
    /// Global metrics registry instance
    pub static ref METRICS: MetricsRegistry = MetricsRegistry::new();
}

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        // Client metrics
        let calls_total = IntCounter::new(
            "client_calls_total",
            "Total number of RPC calls emitted"
        ).unwrap();

        let calls_succeeded = IntCounter::new(
            "client_calls_succeeded_total",
            "Total number of RPC calls resolved successfully"
        ).unwrap();

        let calls_failed = IntCounter::new(
            "client_calls_failed_total",
            "Total number of RPC calls rejected by the peer"
        ).unwrap();

        let calls_timed_out = IntCounter::new(
            "client_calls_timed_out_total",
            "Total number of RPC calls that timed out"
        ).unwrap();

        let calls_rejected = IntCounter::new(
            "client_calls_rejected_total",
            "Total number of RPC calls refused before sending"
        ).unwrap();

        let correlation_faults = IntCounter::new(
            "client_correlation_faults_total",
            "Total number of responses without a pending call"
        ).unwrap();

        let pending_calls = IntGauge::new(
            "client_pending_calls",
            "Current number of calls awaiting a response"
        ).unwrap();

        // Coordinator metrics
        let live_workers = IntGauge::new(
            "coordinator_live_workers",
            "Current number of live workers"
        ).unwrap();

        let handshakes_sent = IntCounter::new(
            "coordinator_handshakes_sent_total",
            "Total number of configuration handshakes sent"
        ).unwrap();

        let requests_forwarded = IntCounter::new(
            "coordinator_requests_forwarded_total",
            "Total number of worker requests forwarded to dispatch"
        ).unwrap();

        let requests_dropped = IntCounter::new(
            "coordinator_requests_dropped_total",
            "Total number of worker messages dropped by validation"
        ).unwrap();

        let replies_sent = IntCounter::new(
            "coordinator_replies_sent_total",
            "Total number of responses delivered to workers"
        ).unwrap();

        let replies_failed = IntCounter::new(
            "coordinator_replies_failed_total",
            "Total number of responses that could not be delivered"
        ).unwrap();

        // Register all metrics
        registry.register(Box::new(calls_total.clone())).unwrap();
        registry.register(Box::new(calls_succeeded.clone())).unwrap();
        registry.register(Box::new(calls_failed.clone())).unwrap();
        registry.register(Box::new(calls_timed_out.clone())).unwrap();
        registry.register(Box::new(calls_rejected.clone())).unwrap();
        registry.register(Box::new(correlation_faults.clone())).unwrap();
        registry.register(Box::new(pending_calls.clone())).unwrap();

        registry.register(Box::new(live_workers.clone())).unwrap();
        registry.register(Box::new(handshakes_sent.clone())).unwrap();
        registry.register(Box::new(requests_forwarded.clone())).unwrap();
        registry.register(Box::new(requests_dropped.clone())).unwrap();
        registry.register(Box::new(replies_sent.clone())).unwrap();
        registry.register(Box::new(replies_failed.clone())).unwrap();

        let client = ClientMetrics {
            calls_total,
            calls_succeeded,
            calls_failed,
            calls_timed_out,
            calls_rejected,
            correlation_faults,
            pending_calls,
        };

        let coordinator = CoordinatorMetrics {
            live_workers,
            handshakes_sent,
            requests_forwarded,
            requests_dropped,
            replies_sent,
            replies_failed,
        };

        MetricsRegistry {
            registry,
            client,
            coordinator,
        }
    }

    /// Gather all metrics as text
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let metrics = MetricsRegistry::new();

        metrics.client.calls_total.inc();
        metrics.client.pending_calls.set(3);
        metrics.coordinator.live_workers.set(2);

        let output = metrics.gather();
        assert!(output.contains("client_calls_total"));
        assert!(output.contains("client_pending_calls 3"));
        assert!(output.contains("coordinator_live_workers 2"));
    }
}
