//! # Handshake State Machines
//!
//! Client and server halves of connection negotiation.
//!
//! Both halves are pure transition functions: the caller hands in the current
//! time and one inbound packet (or a timer tick through `update`), and gets
//! back an [`Outcome`] describing what changed and which packets to send.
//! Nothing here blocks, reads the clock, or touches a socket.
//!
//! ## Flow
//! ```text
//! client                         server
//!   | -- ConnectionRequest -->     |  token checked by TokenAuthority
//!   | <-- Challenge ----------     |  (or ConnectionDenied when full)
//!   | -- ChallengeResponse -->     |  compared byte for byte
//!   | <-- KeepAlive(index) ---     |  slot assigned
//!   | <== KeepAlive/Connection ==> |
//!   | -- Disconnect --------->     |  either side, unacknowledged
//! ```
//!
//! ## Silence
//! Invalid or expired tokens, replayed tokens and challenge mismatches
//! produce no reply at all. The only pre-authentication signal a peer can
//! get is `ConnectionDenied`, and only after presenting a valid token.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::core::packet::Packet;
use crate::core::token::{ChallengeToken, ConnectTokenRef};
use crate::error::Result;

pub mod client;
pub mod server;


pub use client::{Client, ClientState};
pub use server::{Server, ServerEvent, ServerPeerState};

/// What a validated connect token says about its holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientIdentity {
    pub client_id: u64,
}

/// The external trust component that mints and opens tokens.
///
/// Implementations own all cryptography. The server calls them synchronously
/// and only after the cheap structural checks have passed.
pub trait TokenAuthority {
    /// Decrypt and validate a connect token presented from `address`.
    ///
    /// Returns `None` for anything the server should silently ignore.
    fn validate_connect_token(
        &self,
        token: &ConnectTokenRef,
        address: SocketAddr,
        now: Duration,
    ) -> Option<ClientIdentity>;

    /// Mint a fresh challenge token for a client that passed validation
    fn generate_challenge_token(
        &mut self,
        identity: &ClientIdentity,
        address: SocketAddr,
    ) -> Result<ChallengeToken>;
}

/// Why a peer's session ended
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    #[error("server denied connection")]
    ConnectionDenied,
    #[error("connection timed out during handshake")]
    ConnectTimedOut,
    #[error("connection timed out")]
    ConnectionTimedOut,
    #[error("connection terminated by server")]
    DisconnectedByServer,
    #[error("connection terminated by client")]
    DisconnectedByClient,
    /// An insecure connect with a new salt took over the address
    #[error("connection replaced by a new session")]
    Superseded,
}

/// How processing one input moved the peer's state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed (includes every silent drop)
    Unchanged,
    /// The peer moved forward in the handshake
    Advanced,
    /// The peer's local state was removed
    Evicted,
}

/// A packet to hand to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub address: SocketAddr,
    pub packet: Packet,
}

impl Outbound {
    pub fn new(address: SocketAddr, packet: Packet) -> Self {
        Self { address, packet }
    }
}

/// Result of processing one inbound datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub transition: Transition,
    pub outbound: Vec<Outbound>,
}

impl Outcome {
    pub fn unchanged() -> Self {
        Self {
            transition: Transition::Unchanged,
            outbound: Vec::new(),
        }
    }

    pub fn advanced(outbound: Vec<Outbound>) -> Self {
        Self {
            transition: Transition::Advanced,
            outbound,
        }
    }

    pub fn evicted(outbound: Vec<Outbound>) -> Self {
        Self {
            transition: Transition::Evicted,
            outbound,
        }
    }

    /// A single reply to `address`
    pub fn reply(transition: Transition, address: SocketAddr, packet: Packet) -> Self {
        Self {
            transition,
            outbound: vec![Outbound::new(address, packet)],
        }
    }

    /// No state change and nothing to send
    pub fn is_silent(&self) -> bool {
        self.transition == Transition::Unchanged && self.outbound.is_empty()
    }
}
