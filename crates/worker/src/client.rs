//! Call/await interface over one-way sockets
//!
//! [`WampClient::upgrade`] attaches a single `rpc-response` listener to a
//! socket and returns a [`WampSocket`] whose `call` emits a signed
//! `rpc-request` and resolves once the matching response arrives or the
//! request window elapses.

use crate::pending::{
    signature_candidate, CallOutcome, PendingCall, PendingCallTable, MAX_CALLS_ALLOWED, MAX_GENERATE_ATTEMPTS,
};
use crate::socket::Socket;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, trace, warn};
use wampline_common::config::ClientConfig;
use wampline_common::error::{Result, WampError};
use wampline_common::METRICS;
use wampline_proto::{is_valid, RpcRequest, RpcResponse, SchemaId, RPC_REQUEST_EVENT, RPC_RESPONSE_EVENT};

/// Request window used when none is configured
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

const FAULT_CHANNEL_CAPACITY: usize = 64;

/// A response that matched no pending call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationFault {
    pub procedure: String,
    pub signature: String,
}

impl From<CorrelationFault> for WampError {
    fn from(fault: CorrelationFault) -> Self {
        WampError::correlation_fault(fault.procedure, fault.signature)
    }
}

/// Source of signature candidates
pub type SignatureSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Records which client serves a socket's `rpc-response` events.
///
/// Socket implementations embed one and expose it through
/// [`Socket::caller_slot`], so the upgrade marker lives with the channel
/// itself rather than in any one client.
#[derive(Default)]
pub struct CallerSlot {
    owner: Mutex<Option<Weak<ClientInner>>>,
}

impl CallerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live client has upgraded the socket
    pub fn is_claimed(&self) -> bool {
        self.owner
            .lock()
            .as_ref()
            .map_or(false, |owner| owner.strong_count() > 0)
    }
}

impl fmt::Debug for CallerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerSlot")
            .field("claimed", &self.is_claimed())
            .finish()
    }
}

/// Client-side correlation engine
///
/// Cloning is cheap; clones share the pending-call table.
#[derive(Clone)]
pub struct WampClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    calls: Mutex<PendingCallTable>,
    request_timeout: Duration,
    faults: broadcast::Sender<CorrelationFault>,
    signatures: SignatureSource,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ClientInner {
    fn take(&self, procedure: &str, signature: &str) -> Option<PendingCall> {
        let call = self.calls.lock().take(procedure, signature);
        if call.is_some() {
            METRICS.client.pending_calls.dec();
        }
        call
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for listener in self.listeners.get_mut().iter() {
            listener.abort();
        }

        // waiters see ChannelClosed once their reply senders drop
        let abandoned = self.calls.get_mut().drain();
        if !abandoned.is_empty() {
            METRICS.client.pending_calls.sub(abandoned.len() as i64);
            debug!("Client dropped with {} calls pending", abandoned.len());
        }
        for call in abandoned {
            call.cancel();
        }
    }
}

impl WampClient {
    /// Create a client whose calls time out after `request_timeout`
    pub fn new(request_timeout: Duration) -> Self {
        Self::with_signature_source(request_timeout, signature_candidate)
    }

    /// Create a client that draws signature candidates from `source`
    pub fn with_signature_source<F>(request_timeout: Duration, source: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let (faults, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(ClientInner {
                calls: Mutex::new(PendingCallTable::new()),
                request_timeout,
                faults,
                signatures: Arc::new(source),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(Duration::from_millis(config.request_timeout_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Attach the response listener to `socket`.
    ///
    /// A socket carries at most one `rpc-response` listener. Upgrading a
    /// socket that is already served, by this client or another one, returns
    /// a handle bound to the client owning that listener. Must be called from
    /// within a tokio runtime.
    pub fn upgrade(&self, socket: Arc<dyn Socket>) -> WampSocket {
        let existing = {
            let mut owner = socket.caller_slot().owner.lock();
            let current = owner
                .as_ref()
                .and_then(Weak::upgrade)
                .filter(|_| socket.listener_count(RPC_RESPONSE_EVENT) > 0);

            match current {
                Some(inner) => Some(WampClient { inner }),
                None => {
                    let responses = socket.on(RPC_RESPONSE_EVENT);
                    let listener = tokio::spawn(listen(
                        Arc::downgrade(&self.inner),
                        socket.id().to_string(),
                        responses,
                    ));

                    let mut listeners = self.inner.listeners.lock();
                    listeners.retain(|listener| !listener.is_finished());
                    listeners.push(listener);

                    *owner = Some(Arc::downgrade(&self.inner));
                    debug!("Upgraded socket {}", socket.id());
                    None
                }
            }
        };

        if existing.is_some() {
            debug!("Socket {} already upgraded", socket.id());
        }

        WampSocket {
            socket,
            client: existing.unwrap_or_else(|| self.clone()),
        }
    }

    /// Subscribe to correlation faults seen by this client
    pub fn subscribe_faults(&self) -> broadcast::Receiver<CorrelationFault> {
        self.inner.faults.subscribe()
    }

    /// Number of calls to `procedure` awaiting a response
    pub fn pending_calls(&self, procedure: &str) -> usize {
        self.inner.calls.lock().pending_for(procedure)
    }

    /// Number of calls awaiting a response across all procedures
    pub fn total_pending_calls(&self) -> usize {
        self.inner.calls.lock().len()
    }

    /// Settle the pending call matching `message`.
    ///
    /// Messages that are not RPC responses are ignored. A response whose
    /// `(procedure, signature)` matches no pending call is reported as a
    /// [`WampError::CorrelationFault`] and published to fault subscribers.
    pub fn handle_response(&self, message: &Value) -> Result<()> {
        if !is_valid(message, SchemaId::RpcResponse) {
            debug!("Ignoring message that is not an RPC response");
            return Ok(());
        }
        let response = RpcResponse::deserialize(message)?;

        let Some(call) = self.inner.take(&response.procedure, &response.signature) else {
            METRICS.client.correlation_faults.inc();
            error!(
                "Unable to find resolving function for procedure {} with signature {}",
                response.procedure, response.signature
            );
            let fault = CorrelationFault {
                procedure: response.procedure,
                signature: response.signature,
            };
            // no subscribers is fine, the fault is still returned
            let _ = self.inner.faults.send(fault.clone());
            return Err(fault.into());
        };

        let outcome: CallOutcome = if response.success {
            METRICS.client.calls_succeeded.inc();
            Ok(response.data.unwrap_or(Value::Null))
        } else {
            METRICS.client.calls_failed.inc();
            Err(WampError::Remote(response.error.unwrap_or(Value::Null)))
        };

        if !call.settle(outcome) {
            trace!(
                "Caller of {} ({}) stopped waiting before the response arrived",
                response.procedure,
                response.signature
            );
        }
        Ok(())
    }

    fn send_call(&self, socket: &dyn Socket, procedure: String, data: Value) -> Result<PendingReply> {
        let (tx, rx) = oneshot::channel();

        let signature = {
            let mut calls = self.inner.calls.lock();

            if calls.pending_for(&procedure) >= MAX_CALLS_ALLOWED {
                METRICS.client.calls_rejected.inc();
                warn!("Rejecting call to {}: {} calls already pending", procedure, MAX_CALLS_ALLOWED);
                return Err(WampError::resource_exhausted(format!(
                    "No more than {} calls allowed",
                    MAX_CALLS_ALLOWED
                )));
            }

            let Some(signature) = calls.generate_signature(&procedure, || (self.inner.signatures)()) else {
                METRICS.client.calls_rejected.inc();
                warn!("Rejecting call to {}: no free signature", procedure);
                return Err(WampError::resource_exhausted(format!(
                    "Failed to generate proper signature {} times",
                    MAX_GENERATE_ATTEMPTS
                )));
            };

            let timeout = self.schedule_timeout(procedure.clone(), signature.clone());
            calls.insert(PendingCall::new(procedure.clone(), signature.clone(), tx, Some(timeout)));
            signature
        };
        METRICS.client.pending_calls.inc();

        let request = RpcRequest::new(procedure.clone(), data, signature.clone());
        let sent = serde_json::to_value(&request)
            .map_err(WampError::from)
            .and_then(|payload| socket.emit(RPC_REQUEST_EVENT, payload));

        if let Err(e) = sent {
            if let Some(call) = self.inner.take(&procedure, &signature) {
                call.cancel();
            }
            warn!("Failed to emit call to {} on socket {}: {}", procedure, socket.id(), e);
            return Err(e);
        }

        METRICS.client.calls_total.inc();
        trace!("Emitted call to {} with signature {}", procedure, signature);

        Ok(PendingReply {
            procedure,
            signature,
            rx,
        })
    }

    fn schedule_timeout(&self, procedure: String, signature: String) -> AbortHandle {
        let inner = Arc::downgrade(&self.inner);
        let window = self.inner.request_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            if let Some(call) = inner.take(&procedure, &signature) {
                METRICS.client.calls_timed_out.inc();
                debug!("Call to {} ({}) timed out after {:?}", procedure, signature, window);
                call.settle(Err(WampError::timeout("RPC response timeout exceeded")));
            }
        })
        .abort_handle()
    }
}

/// Serve `rpc-response` events for one socket, in arrival order
async fn listen(
    inner: Weak<ClientInner>,
    socket_id: String,
    mut responses: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(message) = responses.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let client = WampClient { inner };

        // faults are already logged and published by handle_response
        if let Err(e) = client.handle_response(&message) {
            trace!("Dropped response on socket {}: {}", socket_id, e);
        }
    }
    debug!("Response listener for socket {} stopped", socket_id);
}

/// A socket upgraded with call capability
#[derive(Clone)]
pub struct WampSocket {
    socket: Arc<dyn Socket>,
    client: WampClient,
}

impl WampSocket {
    pub fn id(&self) -> &str {
        self.socket.id()
    }

    /// The client whose listener serves this socket
    pub fn client(&self) -> &WampClient {
        &self.client
    }

    /// Emit a call and return the future of its reply.
    ///
    /// Fails without emitting anything when the procedure already has
    /// [`MAX_CALLS_ALLOWED`] calls pending or no free signature was found.
    /// Must be called from within a tokio runtime, since the call's timeout
    /// runs as a spawned task.
    pub fn send_call(&self, procedure: impl Into<String>, data: Value) -> Result<PendingReply> {
        self.client
            .send_call(self.socket.as_ref(), procedure.into(), data)
    }

    /// Call `procedure` and wait for its result.
    ///
    /// Like [`send_call`](Self::send_call), this needs a tokio runtime.
    pub async fn call(&self, procedure: impl Into<String>, data: Value) -> Result<Value> {
        self.send_call(procedure, data)?.await
    }
}

/// Future of one call's reply
#[derive(Debug)]
pub struct PendingReply {
    procedure: String,
    signature: String,
    rx: oneshot::Receiver<CallOutcome>,
}

impl PendingReply {
    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(WampError::channel_closed("client dropped before the call settled"))
            })
        })
    }
}
