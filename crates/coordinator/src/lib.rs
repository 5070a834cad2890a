//! Wampline Coordinator
//!
//! Master side of the RPC layer: greets joining workers with the shared
//! configuration, dispatches their validated requests and routes replies back
//! by worker identifier.

pub mod dispatch;
pub mod router;
pub mod transport;

pub use dispatch::{Dispatch, EndpointRegistry, Reply};
pub use router::Router;
pub use transport::{ClusterEvent, LocalCluster, WorkerPort, WorkerTransport};
