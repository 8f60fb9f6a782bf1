//! # Error Types
//!
//! Error handling for the connection negotiation protocol.
//!
//! Errors in this crate are *local*: they describe why a buffer could not be
//! encoded or decoded, why a configuration was rejected, or why an API call
//! was made in the wrong state. None of them is ever echoed back to a remote
//! peer. The handshake state machines translate every network-level failure
//! into a silent [`Outcome`](crate::protocol::Outcome) and record it through
//! `tracing` and [`Metrics`](crate::utils::metrics::Metrics) instead.
//!
//! ## Error Categories
//! - **Structural**: truncated streams, bad padding, out-of-range fields
//! - **Registry**: unknown or disabled packet tags
//! - **Usage**: operations invoked in a state that does not allow them
//! - **Environment**: I/O, configuration, logging and system clock failures
//!
//! ## Example Usage
//! ```rust
//! use handshake_protocol::core::registry::PacketRegistry;
//! use handshake_protocol::core::WireContext;
//! use handshake_protocol::error::ProtocolError;
//!
//! let registry = PacketRegistry::new(WireContext::secure(64));
//! match registry.decode(&[0xFF]) {
//!     Err(ProtocolError::UnknownPacketType(tag)) => assert_eq!(tag, 0xFF),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Stream errors
    pub const ERR_STREAM_TRUNCATED: &str = "Stream ended before all fields were read";
    pub const ERR_NON_ZERO_PADDING: &str = "Alignment padding bits were not zero";

    /// Client state errors
    pub const ERR_ALREADY_CONNECTING: &str = "Client is already connecting or connected";
    pub const ERR_CLIENT_NOT_CONNECTED: &str = "Client is not connected";

    /// Server state errors
    pub const ERR_CLIENT_SLOT_EMPTY: &str = "No client occupies that slot";
    pub const ERR_CLIENT_SLOT_RANGE: &str = "Client index outside of configured slots";

    /// Environment errors
    pub const ERR_SYSTEM_TIME: &str = "System time error: time went backwards";
    pub const ERR_LOGGING_INIT: &str = "Failed to install tracing subscriber";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Insecure connect is disabled in secure mode")]
    InsecureConnectDisabled,

    #[error("Stream truncated: {0}")]
    Truncated(String),

    #[error("Invalid padding: {0}")]
    InvalidPadding(String),

    #[error("Value {value} for `{field}` outside of [{min}, {max}]")]
    ValueOutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Trailing bytes after packet body: {0}")]
    TrailingBytes(usize),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Empty datagram")]
    EmptyDatagram,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Token authority error: {0}")]
    TokenAuthority(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    pub(crate) fn out_of_range(field: &str, value: i64, min: i64, max: i64) -> Self {
        ProtocolError::ValueOutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
