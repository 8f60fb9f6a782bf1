//! Packet type registry.
//!
//! Built once from the compiled-in tag list and the active [`WireContext`],
//! then shared read-only (typically behind an `Arc`) by every component that
//! encodes or decodes datagrams. There is no process-wide instance.

use bytes::Bytes;
use tracing::{instrument, trace};

use crate::config::ProtocolConfig;
use crate::core::bitstream::{BitReader, BitWriter};
use crate::core::packet::{Packet, PacketType, MAX_PACKET_BYTES};
use crate::core::WireContext;
use crate::error::{ProtocolError, Result};

/// Immutable tag to shape table for one wire context
#[derive(Debug, Clone)]
pub struct PacketRegistry {
    context: WireContext,
    types: Vec<PacketType>,
}

impl PacketRegistry {
    pub fn new(context: WireContext) -> Self {
        let types = PacketType::ALL
            .iter()
            .copied()
            .filter(|packet_type| packet_type.is_available(&context))
            .collect();
        Self { context, types }
    }

    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.wire_context())
    }

    pub fn context(&self) -> &WireContext {
        &self.context
    }

    /// Active packet types in tag order
    pub fn packet_types(&self) -> &[PacketType] {
        &self.types
    }

    pub fn contains(&self, packet_type: PacketType) -> bool {
        self.types.contains(&packet_type)
    }

    /// Resolve a wire tag against the active set
    pub fn lookup(&self, tag: u8) -> Result<PacketType> {
        PacketType::from_tag(tag)
            .filter(|packet_type| self.contains(*packet_type))
            .ok_or(ProtocolError::UnknownPacketType(tag))
    }

    /// Allocate a zero-initialized packet for `tag`
    pub fn create(&self, tag: u8) -> Result<Packet> {
        self.lookup(tag).map(Packet::zeroed)
    }

    /// Release a packet obtained from [`create`](Self::create) or [`decode`](Self::decode)
    pub fn destroy(&self, packet: Packet) {
        trace!(packet_type = packet.packet_type().name(), "Packet released");
        drop(packet);
    }

    /// Largest serialized size of `packet_type`, tag byte included
    pub fn max_packet_bytes(&self, packet_type: PacketType) -> usize {
        1 + packet_type.max_body_bytes(&self.context)
    }

    /// Encode a packet as `[tag][body]`. The packet is consumed.
    #[instrument(
        level = "trace",
        skip(self, packet),
        fields(packet_type = packet.packet_type().name())
    )]
    pub fn encode(&self, mut packet: Packet) -> Result<Bytes> {
        let packet_type = packet.packet_type();
        if !self.contains(packet_type) {
            return Err(match packet_type {
                PacketType::InsecureConnect => ProtocolError::InsecureConnectDisabled,
                other => ProtocolError::UnknownPacketType(other.tag()),
            });
        }

        let mut writer = BitWriter::with_capacity(self.context, self.max_packet_bytes(packet_type));
        writer.write_bits(u32::from(packet_type.tag()), 8);
        packet.serialize(&mut writer)?;
        Ok(writer.finish())
    }

    /// Decode one datagram. Unknown tags, malformed bodies and trailing
    /// bytes are all rejected before the packet reaches a state machine.
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    pub fn decode(&self, data: &[u8]) -> Result<Packet> {
        if data.is_empty() {
            return Err(ProtocolError::EmptyDatagram);
        }
        if data.len() > MAX_PACKET_BYTES {
            return Err(ProtocolError::OversizedPacket(data.len()));
        }

        let mut reader = BitReader::new(self.context, data);
        let tag = reader.read_bits(8)? as u8;
        let mut packet = self.create(tag)?;
        packet.serialize(&mut reader)?;
        reader.finish()?;

        trace!(packet_type = packet.packet_type().name(), "Packet decoded");
        Ok(packet)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::token::{ChallengeToken, ConnectTokenRef, CONNECT_TOKEN_BYTES, NONCE_BYTES};

    #[test]
    fn test_secure_registry_omits_insecure_connect() {
        let registry = PacketRegistry::new(WireContext::secure(64));
        assert_eq!(registry.packet_types().len(), 7);
        assert!(!registry.contains(PacketType::InsecureConnect));
        assert_eq!(registry.packet_types().last(), Some(&PacketType::Connection));

        assert!(matches!(
            registry.create(PacketType::InsecureConnect.tag()),
            Err(ProtocolError::UnknownPacketType(6))
        ));
        assert!(matches!(
            registry.encode(Packet::insecure_connect(1, 2)),
            Err(ProtocolError::InsecureConnectDisabled)
        ));
    }

    #[test]
    fn test_insecure_registry_has_every_type() {
        let registry = PacketRegistry::new(WireContext::insecure(64));
        assert_eq!(registry.packet_types(), &PacketType::ALL[..]);
        assert_eq!(
            registry.create(6).unwrap(),
            Packet::insecure_connect(0, 0)
        );
    }

    #[test]
    fn test_create_is_zeroed() {
        let registry = PacketRegistry::new(WireContext::secure(8));
        match registry.create(0).unwrap() {
            Packet::ConnectionRequest(request) => {
                assert_eq!(request.token, ConnectTokenRef::default());
            }
            other => panic!("unexpected packet {other:?}"),
        }
        assert!(matches!(
            registry.create(200),
            Err(ProtocolError::UnknownPacketType(200))
        ));
    }

    #[test]
    fn test_encode_decode_with_tag() {
        let registry = PacketRegistry::new(WireContext::secure(8));
        let token = ConnectTokenRef::new(42, [7u8; CONNECT_TOKEN_BYTES], [1u8; NONCE_BYTES]);
        let packet = Packet::connection_request(token);

        let bytes = registry.encode(packet.clone()).unwrap();
        assert_eq!(bytes[0], PacketType::ConnectionRequest.tag());
        assert_eq!(bytes.len(), registry.max_packet_bytes(PacketType::ConnectionRequest));

        let decoded = registry.decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
        registry.destroy(decoded);
    }

    #[test]
    fn test_empty_packets_are_one_byte() {
        let registry = PacketRegistry::new(WireContext::secure(8));
        assert_eq!(&registry.encode(Packet::ConnectionDenied).unwrap()[..], &[1]);
        assert_eq!(&registry.encode(Packet::Disconnect).unwrap()[..], &[5]);
        assert_eq!(registry.decode(&[5]).unwrap(), Packet::Disconnect);
    }

    #[test]
    fn test_decode_rejects_malformed_datagrams() {
        let registry = PacketRegistry::new(WireContext::secure(8));
        assert!(matches!(
            registry.decode(&[]),
            Err(ProtocolError::EmptyDatagram)
        ));
        assert!(matches!(
            registry.decode(&vec![0u8; MAX_PACKET_BYTES + 1]),
            Err(ProtocolError::OversizedPacket(_))
        ));
        // challenge with its token cut short
        assert!(matches!(
            registry.decode(&[2, 0, 0, 0]),
            Err(ProtocolError::Truncated(_))
        ));
        // denied packet followed by junk
        assert!(matches!(
            registry.decode(&[1, 0xAA]),
            Err(ProtocolError::TrailingBytes(1))
        ));
    }

    #[test]
    fn test_anti_amplification_sizes() {
        for context in [
            WireContext::secure(1),
            WireContext::secure(256),
            WireContext::insecure(1),
            WireContext::insecure(256),
        ] {
            let registry = PacketRegistry::new(context);
            let request = registry.max_packet_bytes(PacketType::ConnectionRequest);
            assert!(registry.max_packet_bytes(PacketType::ConnectionDenied) < request);
            assert!(registry.max_packet_bytes(PacketType::Challenge) < request);
            assert!(registry.max_packet_bytes(PacketType::KeepAlive) < request);
            for packet_type in registry.packet_types() {
                assert!(registry.max_packet_bytes(*packet_type) <= request);
            }
        }

        let registry = PacketRegistry::new(WireContext::secure(8));
        let challenge = registry
            .encode(Packet::challenge(ChallengeToken::default()))
            .unwrap();
        assert_eq!(challenge.len(), registry.max_packet_bytes(PacketType::Challenge));
    }
}
