//! Server half of the handshake.
//!
//! Tracks pending challenges per source address and a fixed table of client
//! slots. Every inbound datagram is resolved to an [`Outcome`]; failures are
//! counted in [`Metrics`] and logged, never echoed to the network.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::packet::{
    ChallengeResponsePacket, ConnectionRequestPacket, InsecureConnectPacket, KeepAlivePacket,
    Packet, MAX_CONNECTION_PAYLOAD_BYTES,
};
use crate::core::registry::PacketRegistry;
use crate::core::token::ChallengeToken;
use crate::error::{constants, ProtocolError, Result};
use crate::utils::metrics::{DropReason, Metrics};
use crate::utils::replay_cache::{CacheStats, ReplayCache};
use crate::utils::time::elapsed;

use super::{ClientIdentity, DisconnectReason, Outbound, Outcome, TokenAuthority, Transition};

/// Where a remote address stands from the server's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPeerState {
    Idle,
    AwaitingResponse,
    Connected { client_index: i32 },
}

/// Notifications for the application layer, drained with [`Server::pop_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected {
        client_index: i32,
        client_id: u64,
        address: SocketAddr,
    },
    ClientDisconnected {
        client_index: i32,
        client_id: u64,
        address: SocketAddr,
        reason: DisconnectReason,
    },
    Payload {
        client_index: i32,
        payload: Vec<u8>,
    },
}

#[derive(Debug)]
struct PendingConnection {
    challenge: ChallengeToken,
    identity: ClientIdentity,
    issued_at: Duration,
}

#[derive(Debug)]
struct ConnectedClient {
    address: SocketAddr,
    client_id: u64,
    client_salt: u64,
    last_received: Duration,
    last_sent: Duration,
}

/// Handshake server for one listening socket.
///
/// Not internally synchronized. A host that spreads peers across tasks
/// shards them by source address so each server instance has one owner.
pub struct Server<A: TokenAuthority> {
    config: ServerConfig,
    registry: Arc<PacketRegistry>,
    authority: A,
    replay_cache: ReplayCache,
    pending: HashMap<SocketAddr, PendingConnection>,
    clients: Vec<Option<ConnectedClient>>,
    client_by_address: HashMap<SocketAddr, usize>,
    events: VecDeque<ServerEvent>,
    metrics: Arc<Metrics>,
}

impl<A: TokenAuthority> Server<A> {
    /// Create a server with one slot per `max_clients` in the registry's context
    pub fn new(config: ServerConfig, registry: Arc<PacketRegistry>, authority: A) -> Self {
        let max_clients = registry.context().max_clients() as usize;
        let replay_cache =
            ReplayCache::with_settings(config.replay_cache_ttl, config.replay_cache_capacity);

        info!(
            max_clients,
            mode = ?registry.context().mode(),
            "Handshake server created"
        );

        Self {
            config,
            registry,
            authority,
            replay_cache,
            pending: HashMap::new(),
            clients: (0..max_clients).map(|_| None).collect(),
            client_by_address: HashMap::new(),
            events: VecDeque::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Share a metrics collector with other components
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    /// Occupancy of the connect-token replay cache
    pub fn replay_cache_stats(&self) -> CacheStats {
        self.replay_cache.stats()
    }

    pub fn max_clients(&self) -> usize {
        self.clients.len()
    }

    pub fn connected_clients(&self) -> usize {
        self.client_by_address.len()
    }

    pub fn pending_connections(&self) -> usize {
        self.pending.len()
    }

    pub fn is_full(&self) -> bool {
        self.free_slot().is_none()
    }

    pub fn client_address(&self, client_index: i32) -> Option<SocketAddr> {
        self.slot(client_index)
            .ok()
            .and_then(|slot| self.clients[slot].as_ref())
            .map(|client| client.address)
    }

    pub fn peer_state(&self, address: SocketAddr) -> ServerPeerState {
        if let Some(&slot) = self.client_by_address.get(&address) {
            ServerPeerState::Connected {
                client_index: slot as i32,
            }
        } else if self.pending.contains_key(&address) {
            ServerPeerState::AwaitingResponse
        } else {
            ServerPeerState::Idle
        }
    }

    pub fn pop_event(&mut self) -> Option<ServerEvent> {
        self.events.pop_front()
    }

    /// Decode a raw datagram and process it.
    ///
    /// Undecodable datagrams (unknown tag, out-of-range field, truncation)
    /// are dropped here and never reach the state machine.
    pub fn process_datagram(&mut self, from: SocketAddr, data: &[u8], now: Duration) -> Outcome {
        match self.registry.decode(data) {
            Ok(packet) => self.process_packet(from, packet, now),
            Err(e) => {
                debug!(%from, error = %e, "Dropping undecodable datagram");
                self.metrics.dropped(DropReason::Malformed);
                Outcome::unchanged()
            }
        }
    }

    #[instrument(
        level = "debug",
        skip(self, packet, now),
        fields(packet_type = packet.packet_type().name())
    )]
    pub fn process_packet(&mut self, from: SocketAddr, packet: Packet, now: Duration) -> Outcome {
        match packet {
            Packet::ConnectionRequest(request) => {
                self.handle_connection_request(from, request, now)
            }
            Packet::ChallengeResponse(response) => {
                self.handle_challenge_response(from, response, now)
            }
            Packet::InsecureConnect(connect) => self.handle_insecure_connect(from, connect, now),
            Packet::KeepAlive(keep_alive) => self.handle_keep_alive(from, keep_alive, now),
            Packet::Connection(connection) => self.handle_payload(from, connection.payload, now),
            Packet::Disconnect => self.handle_disconnect(from),
            Packet::ConnectionDenied | Packet::Challenge(_) => {
                self.drop_packet(from, DropReason::Unexpected, "client-bound packet")
            }
        }
    }

    fn handle_connection_request(
        &mut self,
        from: SocketAddr,
        request: ConnectionRequestPacket,
        now: Duration,
    ) -> Outcome {
        self.metrics.request_received();

        if self.client_by_address.contains_key(&from) {
            return self.drop_packet(from, DropReason::Unexpected, "address already connected");
        }

        let token = &request.token;
        if token.is_expired(now.as_secs()) {
            return self.drop_packet(from, DropReason::ExpiredToken, "connect token expired");
        }

        let Some(identity) = self.authority.validate_connect_token(token, from, now) else {
            return self.drop_packet(from, DropReason::InvalidToken, "connect token rejected");
        };

        if self.replay_cache.is_replay(&token.nonce, from, now) {
            return self.drop_packet(from, DropReason::ReplayedToken, "connect token replayed");
        }

        if self.find_client_id(identity.client_id).is_some() {
            return self.drop_packet(from, DropReason::Unexpected, "client id already connected");
        }

        if let Some(pending) = self.pending.get(&from) {
            debug!(%from, "Resending stored challenge");
            self.metrics.challenge_sent();
            return Outcome::reply(
                Transition::Unchanged,
                from,
                Packet::challenge(pending.challenge.clone()),
            );
        }

        if self.is_full() {
            info!(%from, client_id = identity.client_id, "Server full, denying connection");
            self.metrics.denial_sent();
            return Outcome::reply(Transition::Unchanged, from, Packet::ConnectionDenied);
        }

        let challenge = match self.authority.generate_challenge_token(&identity, from) {
            Ok(challenge) => challenge,
            Err(e) => {
                warn!(%from, error = %e, "Failed to generate challenge token");
                return Outcome::unchanged();
            }
        };

        debug!(%from, client_id = identity.client_id, "Challenge issued");
        self.pending.insert(
            from,
            PendingConnection {
                challenge: challenge.clone(),
                identity,
                issued_at: now,
            },
        );
        self.metrics.challenge_sent();
        Outcome::reply(Transition::Advanced, from, Packet::challenge(challenge))
    }

    fn handle_challenge_response(
        &mut self,
        from: SocketAddr,
        response: ChallengeResponsePacket,
        now: Duration,
    ) -> Outcome {
        if self.client_by_address.contains_key(&from) {
            return self.drop_packet(from, DropReason::Unexpected, "duplicate challenge response");
        }

        let identity = match self.pending.get(&from) {
            None => {
                return self.drop_packet(from, DropReason::Unexpected, "no pending challenge");
            }
            Some(pending) if pending.challenge != response.token => {
                return self.drop_packet(
                    from,
                    DropReason::ChallengeMismatch,
                    "challenge token mismatch",
                );
            }
            Some(pending) => pending.identity,
        };
        self.pending.remove(&from);

        if self.find_client_id(identity.client_id).is_some() {
            debug!(%from, client_id = identity.client_id, "Client id connected meanwhile");
            self.metrics.dropped(DropReason::Unexpected);
            return Outcome::evicted(Vec::new());
        }

        match self.free_slot() {
            Some(slot) => {
                let keep_alive = self.connect_client(slot, from, identity.client_id, 0, now);
                Outcome::advanced(vec![keep_alive])
            }
            None => {
                info!(%from, client_id = identity.client_id, "Server filled during challenge");
                self.metrics.denial_sent();
                Outcome::reply(Transition::Evicted, from, Packet::ConnectionDenied)
            }
        }
    }

    fn handle_insecure_connect(
        &mut self,
        from: SocketAddr,
        connect: InsecureConnectPacket,
        now: Duration,
    ) -> Outcome {
        if !self.registry.context().is_insecure() {
            warn!(%from, "Insecure connect received while disabled");
            return self.drop_packet(from, DropReason::Unexpected, "insecure connect disabled");
        }

        if let Some(&slot) = self.client_by_address.get(&from) {
            let Some(client) = self.clients[slot].as_ref() else {
                return Outcome::unchanged();
            };
            if client.client_salt == connect.client_salt {
                self.metrics.keepalive_sent();
                return Outcome::reply(
                    Transition::Unchanged,
                    from,
                    Packet::keep_alive(slot as i32, client.client_salt),
                );
            }
            // new salt from the same address: a restarted client, the old session is gone
            debug!(%from, client_index = slot, "Insecure connect with new salt replaces session");
            self.remove_client(slot, DisconnectReason::Superseded);
        }

        if self.find_client_id(connect.client_id).is_some() {
            return self.drop_packet(from, DropReason::Unexpected, "client id already connected");
        }

        let Some(slot) = self.free_slot() else {
            info!(%from, client_id = connect.client_id, "Server full, denying insecure connect");
            self.metrics.denial_sent();
            return Outcome::reply(Transition::Unchanged, from, Packet::ConnectionDenied);
        };

        self.pending.remove(&from);
        let keep_alive =
            self.connect_client(slot, from, connect.client_id, connect.client_salt, now);
        Outcome::advanced(vec![keep_alive])
    }

    fn handle_keep_alive(
        &mut self,
        from: SocketAddr,
        keep_alive: KeepAlivePacket,
        now: Duration,
    ) -> Outcome {
        let insecure = self.registry.context().is_insecure();
        let Some(&slot) = self.client_by_address.get(&from) else {
            return self.drop_packet(from, DropReason::Unexpected, "keep-alive from unknown peer");
        };
        let matches = self.clients[slot].as_ref().is_some_and(|client| {
            keep_alive.client_index == slot as i32
                && (!insecure || keep_alive.client_salt == client.client_salt)
        });
        if !matches {
            return self.drop_packet(from, DropReason::Unexpected, "keep-alive for another slot");
        }

        if let Some(client) = self.clients[slot].as_mut() {
            client.last_received = now;
        }
        Outcome::unchanged()
    }

    fn handle_payload(&mut self, from: SocketAddr, payload: Vec<u8>, now: Duration) -> Outcome {
        let Some(&slot) = self.client_by_address.get(&from) else {
            return self.drop_packet(from, DropReason::Unexpected, "payload from unknown peer");
        };
        if let Some(client) = self.clients[slot].as_mut() {
            client.last_received = now;
        }
        self.events.push_back(ServerEvent::Payload {
            client_index: slot as i32,
            payload,
        });
        Outcome::unchanged()
    }

    fn handle_disconnect(&mut self, from: SocketAddr) -> Outcome {
        if let Some(&slot) = self.client_by_address.get(&from) {
            self.remove_client(slot, DisconnectReason::DisconnectedByClient);
            return Outcome::evicted(Vec::new());
        }
        if self.pending.remove(&from).is_some() {
            debug!(%from, "Pending connection abandoned by peer");
            return Outcome::evicted(Vec::new());
        }
        debug!(%from, "Disconnect for unknown peer ignored");
        Outcome::unchanged()
    }

    /// Advance timers: expire pending challenges, time out silent clients and
    /// emit keep-alives that are due.
    pub fn update(&mut self, now: Duration) -> Vec<Outbound> {
        let challenge_timeout = self.config.challenge_timeout;
        let connection_timeout = self.config.connection_timeout;
        let keepalive_interval = self.config.keepalive_interval;

        let before = self.pending.len();
        self.pending.retain(|address, pending| {
            let alive = elapsed(now, pending.issued_at) < challenge_timeout;
            if !alive {
                debug!(%address, "Pending challenge timed out");
            }
            alive
        });
        for _ in self.pending.len()..before {
            self.metrics.timeout();
        }

        let mut outbound = Vec::new();
        let mut timed_out = Vec::new();
        for (slot, entry) in self.clients.iter_mut().enumerate() {
            let Some(client) = entry.as_mut() else {
                continue;
            };
            if elapsed(now, client.last_received) >= connection_timeout {
                timed_out.push(slot);
                continue;
            }
            if elapsed(now, client.last_sent) >= keepalive_interval {
                client.last_sent = now;
                self.metrics.keepalive_sent();
                outbound.push(Outbound::new(
                    client.address,
                    Packet::keep_alive(slot as i32, client.client_salt),
                ));
            }
        }

        for slot in timed_out {
            self.metrics.timeout();
            self.remove_client(slot, DisconnectReason::ConnectionTimedOut);
        }

        outbound
    }

    /// Drop one client and produce the courtesy Disconnect for it
    pub fn disconnect_client(&mut self, client_index: i32) -> Result<Outbound> {
        let slot = self.slot(client_index)?;
        let client = self
            .remove_client(slot, DisconnectReason::DisconnectedByServer)
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_CLIENT_SLOT_EMPTY.into()))?;
        Ok(Outbound::new(client.address, Packet::Disconnect))
    }

    /// Disconnect every client, typically on shutdown; logs final counters
    pub fn disconnect_all(&mut self) -> Vec<Outbound> {
        let goodbyes: Vec<Outbound> = (0..self.clients.len())
            .filter_map(|slot| self.remove_client(slot, DisconnectReason::DisconnectedByServer))
            .map(|client| Outbound::new(client.address, Packet::Disconnect))
            .collect();
        self.metrics.log_metrics();
        goodbyes
    }

    /// Wrap application bytes for a connected client
    pub fn send_payload(
        &mut self,
        client_index: i32,
        payload: Vec<u8>,
        now: Duration,
    ) -> Result<Outbound> {
        if payload.len() > MAX_CONNECTION_PAYLOAD_BYTES {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }
        let slot = self.slot(client_index)?;
        let client = self.clients[slot]
            .as_mut()
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_CLIENT_SLOT_EMPTY.into()))?;
        client.last_sent = now;
        Ok(Outbound::new(client.address, Packet::connection(payload)))
    }

    fn slot(&self, client_index: i32) -> Result<usize> {
        usize::try_from(client_index)
            .ok()
            .filter(|&slot| slot < self.clients.len())
            .ok_or_else(|| ProtocolError::InvalidState(constants::ERR_CLIENT_SLOT_RANGE.into()))
    }

    fn free_slot(&self) -> Option<usize> {
        self.clients.iter().position(Option::is_none)
    }

    fn find_client_id(&self, client_id: u64) -> Option<usize> {
        self.clients
            .iter()
            .position(|entry| entry.as_ref().is_some_and(|c| c.client_id == client_id))
    }

    fn connect_client(
        &mut self,
        slot: usize,
        address: SocketAddr,
        client_id: u64,
        client_salt: u64,
        now: Duration,
    ) -> Outbound {
        self.clients[slot] = Some(ConnectedClient {
            address,
            client_id,
            client_salt,
            last_received: now,
            last_sent: now,
        });
        self.client_by_address.insert(address, slot);
        self.metrics.client_connected();
        self.metrics.keepalive_sent();

        let client_index = slot as i32;
        info!(%address, client_id, client_index, "Client connected");
        self.events.push_back(ServerEvent::ClientConnected {
            client_index,
            client_id,
            address,
        });

        Outbound::new(address, Packet::keep_alive(client_index, client_salt))
    }

    fn remove_client(&mut self, slot: usize, reason: DisconnectReason) -> Option<ConnectedClient> {
        let client = self.clients.get_mut(slot)?.take()?;
        self.client_by_address.remove(&client.address);
        self.metrics.client_disconnected();

        let client_index = slot as i32;
        info!(
            address = %client.address,
            client_id = client.client_id,
            client_index,
            %reason,
            "Client disconnected"
        );
        self.events.push_back(ServerEvent::ClientDisconnected {
            client_index,
            client_id: client.client_id,
            address: client.address,
            reason,
        });
        Some(client)
    }

    fn drop_packet(&self, from: SocketAddr, reason: DropReason, detail: &str) -> Outcome {
        debug!(%from, ?reason, detail, "Dropping packet");
        self.metrics.dropped(reason);
        Outcome::unchanged()
    }
}
