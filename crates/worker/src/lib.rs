//! Wampline Worker
//!
//! Caller side of the RPC layer: turns a socket that only emits events into a
//! call/await interface with per-call signatures, timeouts and bounded
//! concurrency, and lets a worker address the master once it received its
//! handshake.

pub mod client;
pub mod pending;
pub mod session;
pub mod socket;

pub use client::{
    CallerSlot, CorrelationFault, PendingReply, SignatureSource, WampClient, WampSocket, DEFAULT_REQUEST_TIMEOUT,
};
pub use pending::{signature_candidate, PendingCall, PendingCallTable, MAX_CALLS_ALLOWED, MAX_GENERATE_ATTEMPTS};
pub use session::{MasterLink, WorkerSession};
pub use socket::{Listeners, LocalSocket, Outbound, Socket};
