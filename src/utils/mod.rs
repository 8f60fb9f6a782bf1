//! # Utility Modules
//!
//! Supporting utilities for logging, timing, metrics and replay protection.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Time**: Wall-clock helpers and timing defaults
//! - **Replay Cache**: TTL-based connect token nonce binding
//! - **Metrics**: Thread-safe handshake counters

pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod time;

// Re-export public types for advanced users
pub use metrics::{DropReason, Metrics, MetricsSnapshot};
pub use replay_cache::{CacheStats, ReplayCache};
