//! Bidirectional sockets the caller runs over
//!
//! A socket emits named events to its peer and hands inbound events to
//! subscribers. Each subscription is an unbounded channel, so events from one
//! socket reach a subscriber in arrival order.

use crate::client::CallerSlot;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;
use wampline_common::error::{Result, WampError};

/// Per-connection event channel
pub trait Socket: Send + Sync + 'static {
    /// Identifier, stable for the lifetime of the connection
    fn id(&self) -> &str;

    /// Send an event to the peer
    fn emit(&self, event: &str, payload: Value) -> Result<()>;

    /// Subscribe to inbound events with the given name
    fn on(&self, event: &str) -> mpsc::UnboundedReceiver<Value>;

    /// Number of live subscribers for `event`
    fn listener_count(&self, event: &str) -> usize;

    /// Which client, if any, serves this socket's responses
    fn caller_slot(&self) -> &CallerSlot;
}

/// Listener fan-out shared by socket implementations
#[derive(Debug, Default)]
pub struct Listeners {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for `event`
    pub fn subscribe(&self, event: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Hand `payload` to every live subscriber of `event`.
    ///
    /// Returns the number of subscribers reached. Closed subscriptions are
    /// pruned on the way.
    pub fn deliver(&self, event: &str, payload: Value) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(senders) = subscribers.get_mut(event) else {
            trace!("No listeners for event {}", event);
            return 0;
        };

        senders.retain(|tx| !tx.is_closed());
        for tx in senders.iter() {
            // a receiver closing between retain and send just misses this event
            let _ = tx.send(payload.clone());
        }
        senders.len()
    }

    /// Number of live subscribers for `event`
    pub fn count(&self, event: &str) -> usize {
        self.subscribers
            .lock()
            .get(event)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

/// An event emitted by a [`LocalSocket`]
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub event: String,
    pub payload: Value,
}

/// In-memory socket.
///
/// Emitted events land on the receiver returned by [`LocalSocket::new`];
/// inbound events are injected with [`LocalSocket::deliver`].
#[derive(Debug)]
pub struct LocalSocket {
    id: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    listeners: Listeners,
    caller: CallerSlot,
}

impl LocalSocket {
    /// Create a socket with a random identifier
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create a socket with the given identifier
    pub fn with_id(id: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            id: id.into(),
            outbound,
            listeners: Listeners::new(),
            caller: CallerSlot::new(),
        });
        (socket, rx)
    }

    /// Inject an inbound event from the peer
    pub fn deliver(&self, event: &str, payload: Value) -> usize {
        self.listeners.deliver(event, payload)
    }
}

impl Socket for LocalSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn emit(&self, event: &str, payload: Value) -> Result<()> {
        self.outbound
            .send(Outbound {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| WampError::channel_closed(format!("socket {} peer is gone", self.id)))
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
