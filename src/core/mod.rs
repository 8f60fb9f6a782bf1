//! # Core Wire Components
//!
//! Packet shapes, their bit-level schema, and the tag registry.
//!
//! ## Components
//! - **Bitstream**: bidirectional bit-packed stream (one schema, two directions)
//! - **Token**: opaque connect/challenge token references carried by packets
//! - **Packet**: the closed set of negotiation packets
//! - **Registry**: tag to shape mapping, framing and size bounds
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Body(bit-packed, byte aligned, fixed field order)]
//! ```
//!
//! ## Security
//! - Every pre-authentication reply is smaller than the request that triggers it
//! - Bounded integers are range checked on both encode and decode
//! - Trailing bytes and non-zero padding are rejected

use serde::{Deserialize, Serialize};

pub mod bitstream;
pub mod packet;
pub mod registry;
pub mod token;

/// Upper bound on configurable client slots
pub const MAX_CLIENTS_LIMIT: u32 = 256;

/// Whether the development-only insecure connect path exists.
///
/// This changes the set of valid packet tags and whether `KeepAlive`
/// carries a client salt. It never changes the meaning of existing tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Production: token handshake only
    #[default]
    Secure,
    /// Development: token handshake plus `InsecureConnect`
    Insecure,
}

/// Parameters every packet schema needs to read or write its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireContext {
    max_clients: u32,
    mode: ConnectMode,
}

impl WireContext {
    /// Build a context; `max_clients` is clamped to `[1, MAX_CLIENTS_LIMIT]`
    pub fn new(max_clients: u32, mode: ConnectMode) -> Self {
        Self {
            max_clients: max_clients.clamp(1, MAX_CLIENTS_LIMIT),
            mode,
        }
    }

    pub fn secure(max_clients: u32) -> Self {
        Self::new(max_clients, ConnectMode::Secure)
    }

    pub fn insecure(max_clients: u32) -> Self {
        Self::new(max_clients, ConnectMode::Insecure)
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }

    /// Highest legal `clientIndex`
    pub fn max_client_index(&self) -> i32 {
        // max_clients <= MAX_CLIENTS_LIMIT, so this never truncates
        (self.max_clients - 1) as i32
    }

    pub fn mode(&self) -> ConnectMode {
        self.mode
    }

    pub fn is_insecure(&self) -> bool {
        self.mode == ConnectMode::Insecure
    }
}
