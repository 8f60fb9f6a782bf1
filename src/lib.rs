//! # Handshake Protocol
//!
//! Connection negotiation core for real-time client/server games and similar
//! low-latency services running over unreliable datagrams.
//!
//! The crate covers what happens before and around a session, not the
//! session itself:
//!
//! - a closed set of negotiation packets with one bit-packed schema per shape
//! - an immutable packet type registry that frames, decodes and bounds them
//! - server and client state machines for the token/challenge handshake
//! - anti-amplification and anti-replay policy for unauthenticated peers
//!
//! Token cryptography lives behind [`protocol::TokenAuthority`]; sockets,
//! reliability and encryption of established sessions are left to the host.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use handshake_protocol::config::ProtocolConfig;
//! use handshake_protocol::core::registry::PacketRegistry;
//! use handshake_protocol::protocol::Client;
//! use handshake_protocol::utils::time::unix_now;
//!
//! # fn main() -> handshake_protocol::Result<()> {
//! let config = ProtocolConfig::from_file("handshake.toml")?;
//! config.validate_strict()?;
//! let registry = Arc::new(PacketRegistry::from_config(&config));
//!
//! let server = config.server.address.parse().map_err(|_| {
//!     handshake_protocol::ProtocolError::ConfigError("bad server address".into())
//! })?;
//! let mut client = Client::new(config.client.clone(), registry.clone(), server);
//! client.insecure_connect(42, unix_now()?)?;
//! if let Some(outbound) = client.update(unix_now()?) {
//!     let datagram = registry.encode(outbound.packet)?;
//!     // socket.send_to(&datagram, outbound.address)
//!     let _ = datagram;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::config::ProtocolConfig;
pub use crate::core::packet::{Packet, PacketType};
pub use crate::core::registry::PacketRegistry;
pub use crate::core::{ConnectMode, WireContext};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{
    Client, ClientState, DisconnectReason, Outbound, Outcome, Server, ServerEvent, TokenAuthority,
    Transition,
};
