//! Negotiation packet shapes.
//!
//! The set of packets is closed: [`Packet`] is an enum and every consumer
//! matches on it exhaustively. Each shape declares its fields once in a
//! `serialize` method generic over [`BitStream`].

use crate::core::bitstream::{bits_required, BitStream};
use crate::core::token::{
    ChallengeToken, ConnectTokenRef, CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_BYTES, NONCE_BYTES,
};
use crate::core::WireContext;
use crate::error::{ProtocolError, Result};

/// Largest opaque payload a `Connection` packet may carry
pub const MAX_CONNECTION_PAYLOAD_BYTES: usize = 1024;

/// Largest datagram the registry will attempt to decode
pub const MAX_PACKET_BYTES: usize = 1200;

/// Packet tags. The discriminant is the on-wire value and must never change.
///
/// `InsecureConnect` keeps its slot even in secure mode, where it is simply
/// absent from the registry. `Connection` stays last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PacketType {
    /// Client requests a connection with a connect token
    ConnectionRequest = 0,
    /// Server is full
    ConnectionDenied = 1,
    /// Server challenges the client's source address
    Challenge = 2,
    /// Client echoes the challenge token
    ChallengeResponse = 3,
    /// Liveness, and slot assignment on connect
    KeepAlive = 4,
    /// Courtesy teardown notice
    Disconnect = 5,
    /// Development-only tokenless connect
    InsecureConnect = 6,
    /// Post-handshake traffic
    Connection = 7,
}

impl PacketType {
    /// Every tag in wire order
    pub const ALL: [PacketType; 8] = [
        PacketType::ConnectionRequest,
        PacketType::ConnectionDenied,
        PacketType::Challenge,
        PacketType::ChallengeResponse,
        PacketType::KeepAlive,
        PacketType::Disconnect,
        PacketType::InsecureConnect,
        PacketType::Connection,
    ];

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(usize::from(tag)).copied()
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            PacketType::ConnectionRequest => "CONNECTION_REQUEST",
            PacketType::ConnectionDenied => "CONNECTION_DENIED",
            PacketType::Challenge => "CHALLENGE",
            PacketType::ChallengeResponse => "CHALLENGE_RESPONSE",
            PacketType::KeepAlive => "KEEPALIVE",
            PacketType::Disconnect => "DISCONNECT",
            PacketType::InsecureConnect => "INSECURE_CONNECT",
            PacketType::Connection => "CONNECTION",
        }
    }

    /// Whether the tag exists for the given context's mode
    pub fn is_available(self, context: &WireContext) -> bool {
        self != PacketType::InsecureConnect || context.is_insecure()
    }

    /// Maximum body size in bytes, excluding the tag byte
    pub fn max_body_bytes(self, context: &WireContext) -> usize {
        match self {
            PacketType::ConnectionRequest => 8 + CONNECT_TOKEN_BYTES + NONCE_BYTES,
            PacketType::ConnectionDenied | PacketType::Disconnect => 0,
            PacketType::Challenge | PacketType::ChallengeResponse => {
                CHALLENGE_TOKEN_BYTES + NONCE_BYTES
            }
            PacketType::KeepAlive => {
                let index_bits = bits_required(0, context.max_client_index()) as usize;
                let salt_bits = if context.is_insecure() { 64 } else { 0 };
                (index_bits + salt_bits).div_ceil(8)
            }
            PacketType::InsecureConnect => 16,
            PacketType::Connection => {
                let length_bits = bits_required(0, MAX_CONNECTION_PAYLOAD_BYTES as i32) as usize;
                length_bits.div_ceil(8) + MAX_CONNECTION_PAYLOAD_BYTES
            }
        }
    }
}

fn serialize_challenge_token<S: BitStream>(
    stream: &mut S,
    token: &mut ChallengeToken,
) -> Result<()> {
    stream.serialize_bytes(&mut token.data)?;
    stream.serialize_bytes(&mut token.nonce)
}

/// Sent by a client to open a connection. The largest handshake packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRequestPacket {
    pub token: ConnectTokenRef,
}

impl ConnectionRequestPacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        stream.serialize_u64(&mut self.token.expire_timestamp)?;
        stream.serialize_bytes(&mut self.token.data[..])?;
        stream.serialize_bytes(&mut self.token.nonce)
    }
}

/// Sent by the server to make the client prove it owns its source address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengePacket {
    pub token: ChallengeToken,
}

impl ChallengePacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        serialize_challenge_token(stream, &mut self.token)
    }
}

/// The client's unmodified echo of a [`ChallengePacket`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChallengeResponsePacket {
    pub token: ChallengeToken,
}

impl ChallengeResponsePacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        serialize_challenge_token(stream, &mut self.token)
    }
}

/// Liveness packet. The first one after connect tells the client its slot.
///
/// `client_salt` only exists on the wire in insecure mode; in secure mode it
/// is neither written nor read and decodes as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAlivePacket {
    pub client_index: i32,
    pub client_salt: u64,
}

impl KeepAlivePacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        let max_index = stream.context().max_client_index();
        stream.serialize_int("client_index", &mut self.client_index, 0, max_index)?;
        if stream.context().is_insecure() {
            stream.serialize_u64(&mut self.client_salt)?;
        }
        Ok(())
    }
}

/// Development-only connect without a token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsecureConnectPacket {
    pub client_id: u64,
    pub client_salt: u64,
}

impl InsecureConnectPacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        if !stream.context().is_insecure() {
            return Err(ProtocolError::InsecureConnectDisabled);
        }
        stream.serialize_u64(&mut self.client_id)?;
        stream.serialize_u64(&mut self.client_salt)
    }
}

/// Opaque post-handshake payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionPacket {
    pub payload: Vec<u8>,
}

impl ConnectionPacket {
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        let mut length = i32::try_from(self.payload.len()).unwrap_or(i32::MAX);
        stream.serialize_int(
            "payload_length",
            &mut length,
            0,
            MAX_CONNECTION_PAYLOAD_BYTES as i32,
        )?;
        if !S::IS_WRITING {
            // length was range checked above
            self.payload.resize(length as usize, 0);
        }
        stream.serialize_bytes(&mut self.payload)
    }
}

/// One negotiation packet
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::large_enum_variant)]
pub enum Packet {
    ConnectionRequest(ConnectionRequestPacket),
    ConnectionDenied,
    Challenge(ChallengePacket),
    ChallengeResponse(ChallengeResponsePacket),
    KeepAlive(KeepAlivePacket),
    Disconnect,
    InsecureConnect(InsecureConnectPacket),
    Connection(ConnectionPacket),
}

impl Packet {
    /// A zero-initialized instance of the shape bound to `packet_type`
    pub fn zeroed(packet_type: PacketType) -> Self {
        match packet_type {
            PacketType::ConnectionRequest => {
                Packet::ConnectionRequest(ConnectionRequestPacket::default())
            }
            PacketType::ConnectionDenied => Packet::ConnectionDenied,
            PacketType::Challenge => Packet::Challenge(ChallengePacket::default()),
            PacketType::ChallengeResponse => {
                Packet::ChallengeResponse(ChallengeResponsePacket::default())
            }
            PacketType::KeepAlive => Packet::KeepAlive(KeepAlivePacket::default()),
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::InsecureConnect => {
                Packet::InsecureConnect(InsecureConnectPacket::default())
            }
            PacketType::Connection => Packet::Connection(ConnectionPacket::default()),
        }
    }

    pub fn connection_request(token: ConnectTokenRef) -> Self {
        Packet::ConnectionRequest(ConnectionRequestPacket { token })
    }

    pub fn challenge(token: ChallengeToken) -> Self {
        Packet::Challenge(ChallengePacket { token })
    }

    pub fn challenge_response(token: ChallengeToken) -> Self {
        Packet::ChallengeResponse(ChallengeResponsePacket { token })
    }

    pub fn keep_alive(client_index: i32, client_salt: u64) -> Self {
        Packet::KeepAlive(KeepAlivePacket {
            client_index,
            client_salt,
        })
    }

    pub fn insecure_connect(client_id: u64, client_salt: u64) -> Self {
        Packet::InsecureConnect(InsecureConnectPacket {
            client_id,
            client_salt,
        })
    }

    pub fn connection(payload: Vec<u8>) -> Self {
        Packet::Connection(ConnectionPacket { payload })
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ConnectionRequest(_) => PacketType::ConnectionRequest,
            Packet::ConnectionDenied => PacketType::ConnectionDenied,
            Packet::Challenge(_) => PacketType::Challenge,
            Packet::ChallengeResponse(_) => PacketType::ChallengeResponse,
            Packet::KeepAlive(_) => PacketType::KeepAlive,
            Packet::Disconnect => PacketType::Disconnect,
            Packet::InsecureConnect(_) => PacketType::InsecureConnect,
            Packet::Connection(_) => PacketType::Connection,
        }
    }

    /// Transfer the body in declared field order. Empty packets move nothing.
    pub fn serialize<S: BitStream>(&mut self, stream: &mut S) -> Result<()> {
        match self {
            Packet::ConnectionRequest(packet) => packet.serialize(stream),
            Packet::ConnectionDenied | Packet::Disconnect => Ok(()),
            Packet::Challenge(packet) => packet.serialize(stream),
            Packet::ChallengeResponse(packet) => packet.serialize(stream),
            Packet::KeepAlive(packet) => packet.serialize(stream),
            Packet::InsecureConnect(packet) => packet.serialize(stream),
            Packet::Connection(packet) => packet.serialize(stream),
        }
    }
}
