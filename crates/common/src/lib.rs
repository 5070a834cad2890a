//! Wampline common library
//!
//! This crate contains shared code used by callers, workers and the master.

pub mod config;
pub mod error;
pub mod metrics;

// Re-export commonly used types
pub use crate::config::WamplineConfig;
pub use error::{Result, WampError};
pub use metrics::{MetricsRegistry, METRICS};
