//! Worker side of the master handshake
//!
//! The master greets every worker once with its identifier, the registered
//! event names and the shared configuration. The resulting session lets the
//! worker address the master: [`MasterLink`] is a [`Socket`] whose requests
//! are stamped with the worker's own identifier so replies find their way
//! back.

use crate::client::CallerSlot;
use crate::socket::{Listeners, Socket};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use wampline_common::error::{Result, WampError};
use wampline_proto::{
    is_valid, InterProcessRpcRequest, MasterConfigRequest, RpcRequest, SchemaId, WorkerId,
    RPC_REQUEST_EVENT, RPC_RESPONSE_EVENT,
};

/// What a worker learns from the master handshake
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSession {
    pub worker_id: WorkerId,
    pub registered_events: Vec<String>,
    pub config: Map<String, Value>,
}

impl WorkerSession {
    /// Build a session from a handshake message
    pub fn from_handshake(message: &Value) -> Result<Self> {
        if !is_valid(message, SchemaId::MasterConfigRequest) {
            return Err(WampError::invalid_message("expected a master configuration handshake"));
        }
        let handshake = MasterConfigRequest::deserialize(message)?;

        Ok(Self {
            worker_id: handshake.worker_id,
            registered_events: handshake.registered_events,
            config: handshake.config,
        })
    }

    /// Wait for the handshake on a worker inbox.
    ///
    /// Anything arriving before the handshake is discarded.
    pub async fn receive(inbox: &mut mpsc::UnboundedReceiver<Value>) -> Result<Self> {
        while let Some(message) = inbox.recv().await {
            match Self::from_handshake(&message) {
                Ok(session) => {
                    info!(
                        "Worker {} received handshake with {} registered events",
                        session.worker_id,
                        session.registered_events.len()
                    );
                    return Ok(session);
                }
                Err(_) => debug!("Discarding message received before handshake"),
            }
        }
        Err(WampError::channel_closed("master closed the inbox before the handshake"))
    }

    pub fn is_registered_event(&self, name: &str) -> bool {
        self.registered_events.iter().any(|event| event == name)
    }
}

/// A worker's socket to the master
pub struct MasterLink {
    id: String,
    session: WorkerSession,
    to_master: mpsc::UnboundedSender<Value>,
    listeners: Listeners,
    caller: CallerSlot,
}

impl MasterLink {
    pub fn new(session: WorkerSession, to_master: mpsc::UnboundedSender<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: format!("worker-{}-master", session.worker_id),
            session,
            to_master,
            listeners: Listeners::new(),
            caller: CallerSlot::new(),
        })
    }

    pub fn session(&self) -> &WorkerSession {
        &self.session
    }

    /// Route a message received from the master.
    ///
    /// RPC responses go to the link's `rpc-response` listeners; anything else
    /// is dropped. Returns whether a listener received the message.
    pub fn deliver(&self, message: Value) -> bool {
        if !is_valid(&message, SchemaId::RpcResponse) {
            debug!("Worker {} dropped a non-response message from master", self.session.worker_id);
            return false;
        }
        self.listeners.deliver(RPC_RESPONSE_EVENT, message) > 0
    }
}

impl Socket for MasterLink {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        if event != RPC_REQUEST_EVENT || !is_valid(&payload, SchemaId::RpcRequest) {
            return Err(WampError::invalid_message(format!(
                "master link only carries RPC requests, got '{}'",
                event
            )));
        }
        let request = RpcRequest::deserialize(&payload)?;
        let message = serde_json::to_value(InterProcessRpcRequest::from_rpc(
            request,
            self.session.worker_id,
        ))?;

        self.to_master
            .send(message)
            .map_err(|_| WampError::channel_closed(format!("master link of worker {} is closed", self.session.worker_id)))
    }

    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        self.listeners.subscribe(event)
    }

    fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    fn caller_slot(&self) -> &CallerSlot {
        &self.caller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{WampClient, DEFAULT_REQUEST_TIMEOUT};
    use serde_json::json;
    use wampline_proto::RpcResponse;

    fn handshake(worker_id: WorkerId) -> Value {
        let mut config = Map::new();
        config.insert("network".to_string(), json!("testnet"));
        serde_json::to_value(MasterConfigRequest::new(
            worker_id,
            vec!["blocks.new".to_string()],
            config,
        ))
        .unwrap()
    }

    #[test]
    fn test_session_from_handshake() {
        let session = WorkerSession::from_handshake(&handshake(7)).unwrap();
        assert_eq!(session.worker_id, 7);
        assert!(session.is_registered_event("blocks.new"));
        assert!(!session.is_registered_event("blocks.old"));
        assert_eq!(session.config["network"], json!("testnet"));

        let err = WorkerSession::from_handshake(&json!({"type": "RPCRequestSchema"})).unwrap_err();
        assert_eq!(err.code(), "invalid_message");
    }

    #[tokio::test]
    async fn test_receive_skips_early_messages() {
        let (tx, mut inbox) = mpsc::unbounded_channel();
        tx.send(json!({"noise": true})).unwrap();
        tx.send(handshake(3)).unwrap();

        let session = WorkerSession::receive(&mut inbox).await.unwrap();
        assert_eq!(session.worker_id, 3);

        drop(tx);
        assert!(WorkerSession::receive(&mut inbox).await.is_err());
    }

    #[tokio::test]
    async fn test_link_stamps_worker_id() {
        let session = WorkerSession::from_handshake(&handshake(5)).unwrap();
        let (tx, mut to_master) = mpsc::unbounded_channel();
        let link = MasterLink::new(session, tx);

        let request = serde_json::to_value(RpcRequest::new("peers.list", json!({}), "1_1")).unwrap();
        link.emit(RPC_REQUEST_EVENT, request).unwrap();

        let sent = to_master.recv().await.unwrap();
        assert!(is_valid(&sent, SchemaId::InterProcessRpcRequest));
        assert_eq!(sent["workerId"], json!(5));
        assert_eq!(sent["signature"], json!("1_1"));

        assert!(link.emit("something-else", json!({})).is_err());
    }

    #[tokio::test]
    async fn test_call_master_through_link() {
        let session = WorkerSession::from_handshake(&handshake(2)).unwrap();
        let (tx, mut to_master) = mpsc::unbounded_channel();
        let link = MasterLink::new(session, tx);

        let client = WampClient::new(DEFAULT_REQUEST_TIMEOUT);
        let wamp = client.upgrade(link.clone());
        let reply = wamp.send_call("peers.count", json!(null)).unwrap();

        let request = to_master.recv().await.unwrap();
        let response = RpcResponse::success(
            request["procedure"].as_str().unwrap(),
            request["signature"].as_str().unwrap(),
            json!(12),
        );
        assert!(link.deliver(serde_json::to_value(response).unwrap()));
        assert!(!link.deliver(json!({"type": "MasterConfigRequestSchema"})));

        assert_eq!(reply.await.unwrap(), json!(12));
    }

    #[tokio::test]
    async fn test_rebuilt_link_is_served() {
        let client = WampClient::new(DEFAULT_REQUEST_TIMEOUT);

        let (old_tx, _old_to_master) = mpsc::unbounded_channel();
        let old_link = MasterLink::new(WorkerSession::from_handshake(&handshake(4)).unwrap(), old_tx);
        client.upgrade(old_link.clone());

        // reconnect: same worker id, so the same socket id
        let (tx, mut to_master) = mpsc::unbounded_channel();
        let link = MasterLink::new(WorkerSession::from_handshake(&handshake(4)).unwrap(), tx);
        assert_eq!(link.id(), old_link.id());

        let wamp = client.upgrade(link.clone());
        assert_eq!(link.listener_count(RPC_RESPONSE_EVENT), 1);

        let reply = wamp.send_call("peers.count", json!(null)).unwrap();
        let request = to_master.recv().await.unwrap();
        let response = RpcResponse::success(
            request["procedure"].as_str().unwrap(),
            request["signature"].as_str().unwrap(),
            json!(3),
        );
        assert!(link.deliver(serde_json::to_value(response).unwrap()));
        assert_eq!(reply.await.unwrap(), json!(3));
    }
}
