//! Client half of the handshake.
//!
//! The client keeps resending its current handshake packet every
//! `resend_interval` until the server answers or the stage's attempt window
//! closes. A timeout and an explicit denial end in different
//! [`DisconnectReason`]s.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::core::packet::{KeepAlivePacket, Packet, MAX_CONNECTION_PAYLOAD_BYTES};
use crate::core::registry::PacketRegistry;
use crate::core::token::{ChallengeToken, ConnectTokenRef};
use crate::error::{constants, ProtocolError, Result};
use crate::utils::time::elapsed;

use super::{DisconnectReason, Outbound, Outcome, Transition};

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    SendingRequest,
    SendingInsecureConnect,
    SendingChallengeResponse,
    Connected,
    Disconnected(DisconnectReason),
}

impl ClientState {
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            ClientState::SendingRequest
                | ClientState::SendingInsecureConnect
                | ClientState::SendingChallengeResponse
        )
    }
}

pub struct Client {
    config: ClientConfig,
    registry: Arc<PacketRegistry>,
    server_address: SocketAddr,
    state: ClientState,
    connect_token: Option<ConnectTokenRef>,
    challenge: Option<ChallengeToken>,
    client_id: u64,
    client_salt: u64,
    client_index: Option<i32>,
    /// When the current handshake stage began
    stage_started: Duration,
    last_sent: Option<Duration>,
    last_received: Duration,
    received: VecDeque<Vec<u8>>,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        registry: Arc<PacketRegistry>,
        server_address: SocketAddr,
    ) -> Self {
        Self {
            config,
            registry,
            server_address,
            state: ClientState::Idle,
            connect_token: None,
            challenge: None,
            client_id: 0,
            client_salt: 0,
            client_index: None,
            stage_started: Duration::ZERO,
            last_sent: None,
            last_received: Duration::ZERO,
            received: VecDeque::new(),
        }
    }

    /// Begin the secure handshake with a token from the matchmaker.
    ///
    /// # Errors
    /// `InvalidState` if a handshake or session is already active.
    pub fn connect(&mut self, token: ConnectTokenRef, now: Duration) -> Result<()> {
        self.ensure_idle()?;
        self.reset(now);
        info!(server = %self.server_address, "Connecting");
        self.connect_token = Some(token);
        self.state = ClientState::SendingRequest;
        Ok(())
    }

    /// Begin the development-only handshake with a self-chosen id.
    ///
    /// # Errors
    /// `InsecureConnectDisabled` in secure mode, `InvalidState` if a handshake
    /// or session is already active.
    pub fn insecure_connect(&mut self, client_id: u64, now: Duration) -> Result<()> {
        if !self.registry.context().is_insecure() {
            return Err(ProtocolError::InsecureConnectDisabled);
        }
        self.ensure_idle()?;
        self.reset(now);
        self.client_id = client_id;
        self.client_salt = rand::random();
        warn!(server = %self.server_address, client_id, "Connecting without a token");
        self.state = ClientState::SendingInsecureConnect;
        Ok(())
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connecting(&self) -> bool {
        self.state.is_connecting()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self.state {
            ClientState::Disconnected(reason) => Some(reason),
            _ => None,
        }
    }

    /// Slot assigned by the server, once connected
    pub fn client_index(&self) -> Option<i32> {
        self.client_index
    }

    pub fn client_salt(&self) -> u64 {
        self.client_salt
    }

    pub fn server_address(&self) -> SocketAddr {
        self.server_address
    }

    /// Next payload received from the server
    pub fn receive_payload(&mut self) -> Option<Vec<u8>> {
        self.received.pop_front()
    }

    /// Drive resends, timeouts and keep-alives
    pub fn update(&mut self, now: Duration) -> Option<Outbound> {
        match self.state {
            ClientState::SendingRequest
            | ClientState::SendingInsecureConnect
            | ClientState::SendingChallengeResponse => {
                if elapsed(now, self.stage_started) >= self.config.connect_timeout {
                    self.fail(DisconnectReason::ConnectTimedOut);
                    return None;
                }
                if !self.is_due(now, self.config.resend_interval) {
                    return None;
                }
                let packet = self.handshake_packet()?;
                self.last_sent = Some(now);
                Some(Outbound::new(self.server_address, packet))
            }
            ClientState::Connected => {
                if elapsed(now, self.last_received) >= self.config.connection_timeout {
                    self.fail(DisconnectReason::ConnectionTimedOut);
                    return None;
                }
                if !self.is_due(now, self.config.keepalive_interval) {
                    return None;
                }
                let client_index = self.client_index?;
                self.last_sent = Some(now);
                Some(Outbound::new(
                    self.server_address,
                    Packet::keep_alive(client_index, self.client_salt),
                ))
            }
            ClientState::Idle | ClientState::Disconnected(_) => None,
        }
    }

    pub fn process_datagram(&mut self, from: SocketAddr, data: &[u8], now: Duration) -> Outcome {
        match self.registry.decode(data) {
            Ok(packet) => self.process_packet(from, packet, now),
            Err(e) => {
                debug!(%from, error = %e, "Dropping undecodable datagram");
                Outcome::unchanged()
            }
        }
    }

    #[instrument(
        level = "debug",
        skip(self, packet, now),
        fields(packet_type = packet.packet_type().name(), state = ?self.state)
    )]
    pub fn process_packet(&mut self, from: SocketAddr, packet: Packet, now: Duration) -> Outcome {
        if from != self.server_address {
            debug!(%from, "Ignoring packet from unexpected address");
            return Outcome::unchanged();
        }

        match (self.state, packet) {
            (state, Packet::ConnectionDenied) if state.is_connecting() => {
                self.fail(DisconnectReason::ConnectionDenied);
                Outcome::evicted(Vec::new())
            }
            (ClientState::SendingRequest, Packet::Challenge(challenge)) => {
                debug!("Challenge received");
                self.challenge = Some(challenge.token.clone());
                self.connect_token = None;
                self.state = ClientState::SendingChallengeResponse;
                self.stage_started = now;
                self.last_received = now;
                self.last_sent = Some(now);
                Outcome::reply(
                    Transition::Advanced,
                    self.server_address,
                    Packet::challenge_response(challenge.token),
                )
            }
            (
                ClientState::SendingChallengeResponse | ClientState::SendingInsecureConnect,
                Packet::KeepAlive(keep_alive),
            ) => {
                if !self.salt_matches(&keep_alive) {
                    debug!("Ignoring keep-alive for another attempt");
                    return Outcome::unchanged();
                }
                self.client_index = Some(keep_alive.client_index);
                self.challenge = None;
                self.state = ClientState::Connected;
                self.last_received = now;
                info!(client_index = keep_alive.client_index, "Connected");
                Outcome::advanced(Vec::new())
            }
            (ClientState::Connected, Packet::KeepAlive(keep_alive)) => {
                if self.client_index == Some(keep_alive.client_index)
                    && self.salt_matches(&keep_alive)
                {
                    self.last_received = now;
                }
                Outcome::unchanged()
            }
            (ClientState::Connected, Packet::Connection(connection)) => {
                self.last_received = now;
                self.received.push_back(connection.payload);
                Outcome::unchanged()
            }
            (state, Packet::Disconnect)
                if state.is_connecting() || state == ClientState::Connected =>
            {
                self.fail(DisconnectReason::DisconnectedByServer);
                Outcome::evicted(Vec::new())
            }
            (state, packet) => {
                debug!(?state, packet_type = packet.packet_type().name(), "Ignoring packet");
                Outcome::unchanged()
            }
        }
    }

    /// Leave the session. Returns the courtesy Disconnect when one is due.
    pub fn disconnect(&mut self) -> Option<Outbound> {
        if !self.is_connecting() && !self.is_connected() {
            return None;
        }
        self.fail(DisconnectReason::DisconnectedByClient);
        Some(Outbound::new(self.server_address, Packet::Disconnect))
    }

    /// Wrap application bytes for the server
    pub fn send_payload(&mut self, payload: Vec<u8>, now: Duration) -> Result<Outbound> {
        if !self.is_connected() {
            return Err(ProtocolError::InvalidState(
                constants::ERR_CLIENT_NOT_CONNECTED.into(),
            ));
        }
        if payload.len() > MAX_CONNECTION_PAYLOAD_BYTES {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }
        self.last_sent = Some(now);
        Ok(Outbound::new(self.server_address, Packet::connection(payload)))
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_connecting() || self.is_connected() {
            return Err(ProtocolError::InvalidState(
                constants::ERR_ALREADY_CONNECTING.into(),
            ));
        }
        Ok(())
    }

    fn reset(&mut self, now: Duration) {
        self.connect_token = None;
        self.challenge = None;
        self.client_id = 0;
        self.client_salt = 0;
        self.client_index = None;
        self.stage_started = now;
        self.last_sent = None;
        self.last_received = now;
        self.received.clear();
    }

    fn is_due(&self, now: Duration, interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|sent| elapsed(now, sent) >= interval)
    }

    fn handshake_packet(&self) -> Option<Packet> {
        match self.state {
            ClientState::SendingRequest => {
                self.connect_token.clone().map(Packet::connection_request)
            }
            ClientState::SendingChallengeResponse => {
                self.challenge.clone().map(Packet::challenge_response)
            }
            ClientState::SendingInsecureConnect => {
                Some(Packet::insecure_connect(self.client_id, self.client_salt))
            }
            _ => None,
        }
    }

    fn salt_matches(&self, keep_alive: &KeepAlivePacket) -> bool {
        !self.registry.context().is_insecure() || keep_alive.client_salt == self.client_salt
    }

    fn fail(&mut self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::DisconnectedByClient => info!(%reason, "Disconnected"),
            _ => warn!(%reason, "Disconnected"),
        }
        self.state = ClientState::Disconnected(reason);
        self.connect_token = None;
        self.challenge = None;
        self.client_index = None;
    }
}
