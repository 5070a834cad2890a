//! Dispatch registry
//!
//! Maps procedure names to handlers. RPC endpoints produce a reply, event
//! endpoints are fire-and-forget.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use wampline_proto::{MasterRequest, RpcResponse};

/// Outcome of an RPC endpoint: response data or error payload
pub type Reply = std::result::Result<Value, Value>;

/// Handler for an RPC endpoint
pub type RpcHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Reply> + Send + Sync>;

/// Handler for an event endpoint
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// What the master forwards validated requests to
#[async_trait]
pub trait Dispatch: Send + Sync {
    /// Names of the registered event endpoints
    fn event_names(&self) -> Vec<String>;

    /// Run the endpoint for `request`.
    ///
    /// Returns `None` when the endpoint does not answer.
    async fn process(&self, request: &MasterRequest) -> Option<Reply>;

    /// Build the response envelope for `request`
    fn build_response(&self, request: &MasterRequest, error: Option<Value>, data: Option<Value>) -> RpcResponse {
        RpcResponse::for_request(request, error, data)
    }
}

/// In-memory endpoint registry
#[derive(Default)]
pub struct EndpointRegistry {
    rpc: RwLock<HashMap<String, RpcHandler>>,
    event: RwLock<HashMap<String, EventHandler>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an RPC endpoint, replacing any previous one with that name
    pub fn register_rpc<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Reply> + Send + 'static,
    {
        let handler: RpcHandler = Arc::new(move |data| handler(data).boxed());
        self.rpc.write().insert(name.into(), handler);
    }

    /// Register an event endpoint, replacing any previous one with that name
    pub fn register_event<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.event.write().insert(name.into(), Arc::new(handler));
    }

    /// Names of the registered RPC endpoints
    pub fn rpc_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.rpc.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Dispatch for EndpointRegistry {
    fn event_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.event.read().keys().cloned().collect();
        names.sort();
        names
    }

    async fn process(&self, request: &MasterRequest) -> Option<Reply> {
        let procedure = request.procedure();

        let rpc = self.rpc.read().get(procedure).cloned();
        if let Some(handler) = rpc {
            debug!("Dispatching RPC {} ({})", procedure, request.signature());
            return Some(handler(request.data().clone()).await);
        }

        let event = self.event.read().get(procedure).cloned();
        if let Some(handler) = event {
            debug!("Dispatching event {}", procedure);
            handler(request.data().clone());
            return None;
        }

        warn!("Procedure {} not registered", procedure);
        Some(Err(json!(format!("Procedure {} not registered", procedure))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wampline_proto::{InterProcessRpcRequest, RpcRequest};

    fn request(procedure: &str, data: Value) -> MasterRequest {
        MasterRequest::InterProcess(InterProcessRpcRequest::from_rpc(
            RpcRequest::new(procedure, data, "1_1"),
            1,
        ))
    }

    #[tokio::test]
    async fn test_rpc_endpoint() {
        let registry = EndpointRegistry::new();
        registry.register_rpc("math.double", |data: Value| async move {
            data.as_i64()
                .map(|n| json!(n * 2))
                .ok_or_else(|| json!("expected a number"))
        });

        assert_eq!(registry.process(&request("math.double", json!(21))).await, Some(Ok(json!(42))));
        assert_eq!(
            registry.process(&request("math.double", json!("x"))).await,
            Some(Err(json!("expected a number")))
        );
        assert_eq!(registry.rpc_names(), vec!["math.double".to_string()]);
    }

    #[tokio::test]
    async fn test_event_endpoint_has_no_reply() {
        let registry = EndpointRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        registry.register_event("blocks.new", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.process(&request("blocks.new", json!({}))).await, None);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.event_names(), vec!["blocks.new".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_procedure() {
        let registry = EndpointRegistry::new();
        assert_eq!(
            registry.process(&request("nope", json!(null))).await,
            Some(Err(json!("Procedure nope not registered")))
        );
    }
}
