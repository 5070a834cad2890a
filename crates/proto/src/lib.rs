//! Wampline wire protocol
//!
//! Envelope types exchanged between callers, workers and the master, plus the
//! schema validator used to recognise them. Every envelope is a JSON object
//! whose `type` field names the schema it conforms to.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier the transport assigns to a worker process
pub type WorkerId = u32;

/// Socket event carrying outbound RPC requests
pub const RPC_REQUEST_EVENT: &str = "rpc-request";

/// Socket event carrying RPC responses back to the caller
pub const RPC_RESPONSE_EVENT: &str = "rpc-response";

/// Closed set of message shapes known to the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaId {
    /// Handshake sent by the master to a freshly started worker
    #[serde(rename = "MasterConfigRequestSchema")]
    MasterConfigRequest,

    /// Request emitted by a caller on a socket
    #[serde(rename = "RPCRequestSchema")]
    RpcRequest,

    /// Correlated response to an [`RpcRequest`]
    #[serde(rename = "RPCResponseSchema")]
    RpcResponse,

    /// Socket request relayed by a worker to the master
    #[serde(rename = "MasterWAMPRequestSchema")]
    MasterWampRequest,

    /// Request a worker process addresses to the master itself
    #[serde(rename = "InterProcessRPCRequestSchema")]
    InterProcessRpcRequest,
}

impl SchemaId {
    /// Every schema, in declaration order
    pub const ALL: [SchemaId; 5] = [
        SchemaId::MasterConfigRequest,
        SchemaId::RpcRequest,
        SchemaId::RpcResponse,
        SchemaId::MasterWampRequest,
        SchemaId::InterProcessRpcRequest,
    ];

    /// Discriminator value carried in the `type` field
    pub const fn id(self) -> &'static str {
        match self {
            SchemaId::MasterConfigRequest => "MasterConfigRequestSchema",
            SchemaId::RpcRequest => "RPCRequestSchema",
            SchemaId::RpcResponse => "RPCResponseSchema",
            SchemaId::MasterWampRequest => "MasterWAMPRequestSchema",
            SchemaId::InterProcessRpcRequest => "InterProcessRPCRequestSchema",
        }
    }
}

/// Handshake the master sends once to every joining worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterConfigRequest {
    #[serde(rename = "type")]
    pub kind: SchemaId,
    pub worker_id: WorkerId,
    pub registered_events: Vec<String>,
    pub config: Map<String, Value>,
}

impl MasterConfigRequest {
    pub fn new(worker_id: WorkerId, registered_events: Vec<String>, config: Map<String, Value>) -> Self {
        Self {
            kind: SchemaId::MasterConfigRequest,
            worker_id,
            registered_events,
            config,
        }
    }
}

/// Request emitted by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(rename = "type")]
    pub kind: SchemaId,
    pub procedure: String,
    #[serde(default)]
    pub data: Value,
    pub signature: String,
}

impl RpcRequest {
    pub fn new(procedure: impl Into<String>, data: Value, signature: impl Into<String>) -> Self {
        Self {
            kind: SchemaId::RpcRequest,
            procedure: procedure.into(),
            data,
            signature: signature.into(),
        }
    }
}

/// Response correlated to a request by `(procedure, signature)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcResponse {
    #[serde(rename = "type")]
    pub kind: SchemaId,
    pub procedure: String,
    pub signature: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
}

impl RpcResponse {
    /// Successful response carrying `data`
    pub fn success(procedure: impl Into<String>, signature: impl Into<String>, data: Value) -> Self {
        Self {
            kind: SchemaId::RpcResponse,
            procedure: procedure.into(),
            signature: signature.into(),
            success: true,
            data: Some(data),
            error: None,
            worker_id: None,
            socket_id: None,
        }
    }

    /// Failed response carrying `error`
    pub fn failure(procedure: impl Into<String>, signature: impl Into<String>, error: Value) -> Self {
        Self {
            kind: SchemaId::RpcResponse,
            procedure: procedure.into(),
            signature: signature.into(),
            success: false,
            data: None,
            error: Some(error),
            worker_id: None,
            socket_id: None,
        }
    }

    /// Build the response to a master-routed request.
    ///
    /// A present `error` always yields a failed response; `data` is only
    /// carried by successful ones.
    pub fn for_request(request: &MasterRequest, error: Option<Value>, data: Option<Value>) -> Self {
        let mut response = match error {
            Some(error) => Self::failure(request.procedure(), request.signature(), error),
            None => Self::success(
                request.procedure(),
                request.signature(),
                data.unwrap_or(Value::Null),
            ),
        };
        response.worker_id = Some(request.worker_id());
        response.socket_id = request.socket_id().map(str::to_owned);
        response
    }
}

/// Socket request relayed by a worker to the master
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterWampRequest {
    #[serde(rename = "type")]
    pub kind: SchemaId,
    pub procedure: String,
    pub signature: String,
    #[serde(default)]
    pub data: Value,
    pub worker_id: WorkerId,
    pub socket_id: String,
}

/// Request a worker addresses to the master on its own behalf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterProcessRpcRequest {
    #[serde(rename = "type")]
    pub kind: SchemaId,
    pub procedure: String,
    pub signature: String,
    #[serde(default)]
    pub data: Value,
    pub worker_id: WorkerId,
}

impl InterProcessRpcRequest {
    /// Stamp a caller request with the sending worker's identifier
    pub fn from_rpc(request: RpcRequest, worker_id: WorkerId) -> Self {
        Self {
            kind: SchemaId::InterProcessRpcRequest,
            procedure: request.procedure,
            signature: request.signature,
            data: request.data,
            worker_id,
        }
    }
}

/// Any request the master accepts from a worker
#[derive(Debug, Clone, PartialEq)]
pub enum MasterRequest {
    Wamp(MasterWampRequest),
    InterProcess(InterProcessRpcRequest),
}

impl MasterRequest {
    /// Recognise a worker message, returning `None` for anything that is not
    /// a master-routable request.
    pub fn parse(message: &Value) -> Option<Self> {
        if is_valid(message, SchemaId::MasterWampRequest) {
            MasterWampRequest::deserialize(message).ok().map(MasterRequest::Wamp)
        } else if is_valid(message, SchemaId::InterProcessRpcRequest) {
            InterProcessRpcRequest::deserialize(message)
                .ok()
                .map(MasterRequest::InterProcess)
        } else {
            None
        }
    }

    pub fn procedure(&self) -> &str {
        match self {
            MasterRequest::Wamp(r) => &r.procedure,
            MasterRequest::InterProcess(r) => &r.procedure,
        }
    }

    pub fn signature(&self) -> &str {
        match self {
            MasterRequest::Wamp(r) => &r.signature,
            MasterRequest::InterProcess(r) => &r.signature,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            MasterRequest::Wamp(r) => &r.data,
            MasterRequest::InterProcess(r) => &r.data,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        match self {
            MasterRequest::Wamp(r) => r.worker_id,
            MasterRequest::InterProcess(r) => r.worker_id,
        }
    }

    /// Socket the original request came from, for socket-relayed requests
    pub fn socket_id(&self) -> Option<&str> {
        match self {
            MasterRequest::Wamp(r) => Some(&r.socket_id),
            MasterRequest::InterProcess(_) => None,
        }
    }
}

/// Check whether `message` conforms to `schema`.
///
/// The `type` discriminator must name the schema and the message must carry
/// every field the schema requires with the right JSON type.
pub fn is_valid(message: &Value, schema: SchemaId) -> bool {
    if message.get("type").and_then(Value::as_str) != Some(schema.id()) {
        return false;
    }

    match schema {
        SchemaId::MasterConfigRequest => conforms::<MasterConfigRequest>(message),
        SchemaId::RpcRequest => conforms::<RpcRequest>(message),
        SchemaId::RpcResponse => conforms::<RpcResponse>(message),
        SchemaId::MasterWampRequest => conforms::<MasterWampRequest>(message),
        SchemaId::InterProcessRpcRequest => conforms::<InterProcessRpcRequest>(message),
    }
}

fn conforms<T: DeserializeOwned>(message: &Value) -> bool {
    T::deserialize(message).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_ids_match_discriminators() {
        for schema in SchemaId::ALL {
            let encoded = serde_json::to_value(schema).unwrap();
            assert_eq!(encoded, json!(schema.id()));
        }
    }

    #[test]
    fn test_rpc_request_validation() {
        let request = json!({
            "type": "RPCRequestSchema",
            "procedure": "blocks.get",
            "data": {"height": 12},
            "signature": "1700000000000_42",
        });
        assert!(is_valid(&request, SchemaId::RpcRequest));
        assert!(!is_valid(&request, SchemaId::RpcResponse));

        let missing_signature = json!({
            "type": "RPCRequestSchema",
            "procedure": "blocks.get",
        });
        assert!(!is_valid(&missing_signature, SchemaId::RpcRequest));
    }

    #[test]
    fn test_discriminator_must_match() {
        let request = serde_json::to_value(RpcRequest::new("status", json!(null), "1_1")).unwrap();
        let mut relabelled = request.clone();
        relabelled["type"] = json!("RPCResponseSchema");

        assert!(is_valid(&request, SchemaId::RpcRequest));
        assert!(!is_valid(&relabelled, SchemaId::RpcRequest));
        assert!(!is_valid(&json!("not an object"), SchemaId::RpcRequest));
    }

    #[test]
    fn test_response_validation_requires_success_flag() {
        let ok = json!({
            "type": "RPCResponseSchema",
            "procedure": "status",
            "signature": "1_1",
            "success": true,
            "data": 7,
        });
        assert!(is_valid(&ok, SchemaId::RpcResponse));

        let bad = json!({
            "type": "RPCResponseSchema",
            "procedure": "status",
            "signature": "1_1",
            "success": "yes",
        });
        assert!(!is_valid(&bad, SchemaId::RpcResponse));
    }

    #[test]
    fn test_handshake_config_must_be_object() {
        let handshake = serde_json::to_value(MasterConfigRequest::new(
            3,
            vec!["blocks.new".to_string()],
            Map::new(),
        ))
        .unwrap();
        assert!(is_valid(&handshake, SchemaId::MasterConfigRequest));
        assert_eq!(handshake["workerId"], json!(3));
        assert_eq!(handshake["registeredEvents"], json!(["blocks.new"]));

        let mut broken = handshake.clone();
        broken["config"] = json!([1, 2]);
        assert!(!is_valid(&broken, SchemaId::MasterConfigRequest));
    }

    #[test]
    fn test_master_request_parse() {
        let relayed = json!({
            "type": "MasterWAMPRequestSchema",
            "procedure": "peers.list",
            "signature": "5_9",
            "data": {},
            "workerId": 2,
            "socketId": "socket-a",
        });
        let parsed = MasterRequest::parse(&relayed).unwrap();
        assert_eq!(parsed.worker_id(), 2);
        assert_eq!(parsed.socket_id(), Some("socket-a"));

        let inter_process = json!({
            "type": "InterProcessRPCRequestSchema",
            "procedure": "peers.list",
            "signature": "5_10",
            "workerId": 4,
        });
        let parsed = MasterRequest::parse(&inter_process).unwrap();
        assert_eq!(parsed.worker_id(), 4);
        assert_eq!(parsed.data(), &Value::Null);
        assert_eq!(parsed.socket_id(), None);

        let plain = serde_json::to_value(RpcRequest::new("peers.list", json!({}), "5_11")).unwrap();
        assert!(MasterRequest::parse(&plain).is_none());
    }

    #[test]
    fn test_response_for_request() {
        let request = MasterRequest::InterProcess(InterProcessRpcRequest::from_rpc(
            RpcRequest::new("status", json!(null), "8_1"),
            6,
        ));

        let ok = RpcResponse::for_request(&request, None, Some(json!({"height": 1})));
        assert!(ok.success);
        assert_eq!(ok.data, Some(json!({"height": 1})));
        assert_eq!(ok.worker_id, Some(6));

        let failed = RpcResponse::for_request(&request, Some(json!("boom")), Some(json!(1)));
        assert!(!failed.success);
        assert_eq!(failed.error, Some(json!("boom")));
        assert_eq!(failed.data, None);

        let encoded = serde_json::to_value(&failed).unwrap();
        assert!(is_valid(&encoded, SchemaId::RpcResponse));
    }
}
