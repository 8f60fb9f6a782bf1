//! Shared fixtures for integration tests.
//!
//! `SealedAuthority` plays both the matchmaker (sealing connect tokens with a
//! shared private key) and the server's trust component (opening them and
//! sealing challenge tokens with a per-server key).

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use handshake_protocol::config::{ClientConfig, ServerConfig};
use handshake_protocol::core::token::{
    ChallengeToken, ConnectTokenRef, TokenNonce, CHALLENGE_TOKEN_BYTES, CONNECT_TOKEN_BYTES,
};
use handshake_protocol::protocol::ClientIdentity;
use handshake_protocol::{
    Client, PacketRegistry, ProtocolError, Result, Server, TokenAuthority, WireContext,
};

pub const PRIVATE_KEY: [u8; 32] = [7u8; 32];

pub const NOW: Duration = Duration::from_secs(1_700_000_000);

const TAG_BYTES: usize = 16;

fn nonce12(nonce: &TokenNonce) -> [u8; 12] {
    let mut padded = [0u8; 12];
    padded[4..].copy_from_slice(nonce);
    padded
}

pub struct SealedAuthority {
    connect_cipher: ChaCha20Poly1305,
    challenge_cipher: ChaCha20Poly1305,
    challenge_sequence: u64,
}

impl SealedAuthority {
    pub fn new(private_key: [u8; 32]) -> Self {
        let challenge_key: [u8; 32] = rand::random();
        Self {
            connect_cipher: ChaCha20Poly1305::new((&private_key).into()),
            challenge_cipher: ChaCha20Poly1305::new((&challenge_key).into()),
            challenge_sequence: 0,
        }
    }

    /// What a matchmaker would hand a client
    pub fn issue_connect_token(
        &self,
        client_id: u64,
        expire_timestamp: u64,
        nonce: TokenNonce,
    ) -> ConnectTokenRef {
        let mut plaintext = vec![0u8; CONNECT_TOKEN_BYTES - TAG_BYTES];
        plaintext[..8].copy_from_slice(&client_id.to_le_bytes());

        let sealed = self
            .connect_cipher
            .encrypt(
                Nonce::from_slice(&nonce12(&nonce)),
                Payload {
                    msg: &plaintext,
                    aad: &expire_timestamp.to_le_bytes(),
                },
            )
            .expect("seal connect token");

        let mut data = [0u8; CONNECT_TOKEN_BYTES];
        data.copy_from_slice(&sealed);
        ConnectTokenRef::new(expire_timestamp, data, nonce)
    }
}

impl TokenAuthority for SealedAuthority {
    fn validate_connect_token(
        &self,
        token: &ConnectTokenRef,
        _address: SocketAddr,
        _now: Duration,
    ) -> Option<ClientIdentity> {
        let opened = self
            .connect_cipher
            .decrypt(
                Nonce::from_slice(&nonce12(&token.nonce)),
                Payload {
                    msg: &token.data[..],
                    aad: &token.expire_timestamp.to_le_bytes(),
                },
            )
            .ok()?;

        let mut id = [0u8; 8];
        id.copy_from_slice(&opened[..8]);
        Some(ClientIdentity {
            client_id: u64::from_le_bytes(id),
        })
    }

    fn generate_challenge_token(
        &mut self,
        identity: &ClientIdentity,
        _address: SocketAddr,
    ) -> Result<ChallengeToken> {
        self.challenge_sequence += 1;
        let nonce = self.challenge_sequence.to_le_bytes();

        let mut plaintext = vec![0u8; CHALLENGE_TOKEN_BYTES - TAG_BYTES];
        plaintext[..8].copy_from_slice(&identity.client_id.to_le_bytes());

        let sealed = self
            .challenge_cipher
            .encrypt(
                Nonce::from_slice(&nonce12(&nonce)),
                Payload {
                    msg: &plaintext,
                    aad: &[],
                },
            )
            .map_err(|e| ProtocolError::TokenAuthority(e.to_string()))?;

        let mut data = [0u8; CHALLENGE_TOKEN_BYTES];
        data.copy_from_slice(&sealed);
        Ok(ChallengeToken::new(data, nonce))
    }
}

pub fn server_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

pub fn client_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([198, 51, 100, 7], port))
}

pub fn server(context: WireContext) -> Server<SealedAuthority> {
    Server::new(
        ServerConfig::default(),
        Arc::new(PacketRegistry::new(context)),
        SealedAuthority::new(PRIVATE_KEY),
    )
}

pub fn client(server: &Server<SealedAuthority>) -> Client {
    Client::new(
        ClientConfig::default(),
        Arc::clone(server.registry()),
        server_addr(),
    )
}

/// A connect token valid for thirty seconds past [`NOW`]
pub fn valid_token(client_id: u64) -> ConnectTokenRef {
    SealedAuthority::new(PRIVATE_KEY).issue_connect_token(
        client_id,
        NOW.as_secs() + 30,
        client_id.to_le_bytes(),
    )
}

/// Pump one client against the server until both settle or `rounds` runs out
pub fn run_handshake(
    server: &mut Server<SealedAuthority>,
    client: &mut Client,
    from: SocketAddr,
    mut now: Duration,
    rounds: usize,
) -> Duration {
    let registry = Arc::clone(server.registry());
    for _ in 0..rounds {
        if !client.is_connecting() {
            break;
        }
        if let Some(outbound) = client.update(now) {
            let datagram = registry.encode(outbound.packet).unwrap();
            let outcome = server.process_datagram(from, &datagram, now);
            for reply in outcome.outbound {
                let datagram = registry.encode(reply.packet).unwrap();
                let outcome = client.process_datagram(server_addr(), &datagram, now);
                for follow_up in outcome.outbound {
                    let datagram = registry.encode(follow_up.packet).unwrap();
                    let outcome = server.process_datagram(from, &datagram, now);
                    for reply in outcome.outbound {
                        let datagram = registry.encode(reply.packet).unwrap();
                        client.process_datagram(server_addr(), &datagram, now);
                    }
                }
            }
        }
        now += Duration::from_millis(100);
    }
    now
}
