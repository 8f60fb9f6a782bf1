#![no_main]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use handshake_protocol::config::ServerConfig;
use handshake_protocol::core::token::{ChallengeToken, ConnectTokenRef};
use handshake_protocol::protocol::ClientIdentity;
use handshake_protocol::{PacketRegistry, Result, Server, TokenAuthority, WireContext};

/// Tokens whose first byte is odd are valid
struct OddAuthority;

impl TokenAuthority for OddAuthority {
    fn validate_connect_token(
        &self,
        token: &ConnectTokenRef,
        _address: SocketAddr,
        _now: Duration,
    ) -> Option<ClientIdentity> {
        (token.data[0] & 1 == 1).then(|| ClientIdentity {
            client_id: u64::from(token.data[1]),
        })
    }

    fn generate_challenge_token(
        &mut self,
        identity: &ClientIdentity,
        _address: SocketAddr,
    ) -> Result<ChallengeToken> {
        let mut token = ChallengeToken::default();
        token.data[0] = identity.client_id as u8;
        Ok(token)
    }
}

fuzz_target!(|data: &[u8]| {
    let registry = Arc::new(PacketRegistry::new(WireContext::insecure(4)));
    let mut server = Server::new(ServerConfig::default(), registry, OddAuthority);
    let mut now = Duration::from_secs(1_000);

    // [port][len][datagram...] repeated
    let mut rest = data;
    while let [port, len, tail @ ..] = rest {
        let len = usize::from(*len).min(tail.len());
        let (datagram, next) = tail.split_at(len);
        let from = SocketAddr::from(([10, 0, 0, 1], u16::from(*port % 8)));

        let outcome = server.process_datagram(from, datagram, now);
        for outbound in &outcome.outbound {
            assert_eq!(outbound.address, from);
        }
        assert!(server.connected_clients() <= server.max_clients());

        now += Duration::from_millis(250);
        server.update(now);
        rest = next;
    }
});
