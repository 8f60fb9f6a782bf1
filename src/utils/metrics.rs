//! Observability and Metrics
//!
//! Handshake counters for operators. Everything the protocol keeps silent
//! towards the network (invalid tokens, challenge mismatches, replays) is
//! counted here so it stays visible locally.
//!
//! Uses atomic counters for thread-safe metrics collection. Each server owns
//! one instance behind an `Arc`; there is no global collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Why an inbound packet was dropped without a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Datagram failed to decode
    Malformed,
    /// Connect token past its expiry
    ExpiredToken,
    /// Trust component rejected the connect token
    InvalidToken,
    /// Connect token nonce already bound to another address
    ReplayedToken,
    /// Challenge response did not match the issued token
    ChallengeMismatch,
    /// Packet not meaningful in the peer's current state
    Unexpected,
}

/// Metrics collector for one handshake endpoint
#[derive(Debug)]
pub struct Metrics {
    /// Connection requests received
    pub requests_received: AtomicU64,
    /// Challenges sent (first sends and resends)
    pub challenges_sent: AtomicU64,
    /// ConnectionDenied packets sent
    pub denials_sent: AtomicU64,
    /// Keep-alives sent
    pub keepalives_sent: AtomicU64,
    /// Clients promoted to connected
    pub clients_connected: AtomicU64,
    /// Clients removed (disconnect or timeout)
    pub clients_disconnected: AtomicU64,
    /// Pending challenges or connections that timed out
    pub timeouts: AtomicU64,
    /// Datagrams that failed to decode
    pub decode_failures: AtomicU64,
    /// Expired connect tokens
    pub expired_tokens: AtomicU64,
    /// Connect tokens rejected by the trust component
    pub invalid_tokens: AtomicU64,
    /// Connect tokens replayed from another address
    pub replayed_tokens: AtomicU64,
    /// Challenge responses that did not match
    pub challenge_mismatches: AtomicU64,
    /// Packets ignored for the peer's current state
    pub unexpected_packets: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            challenges_sent: AtomicU64::new(0),
            denials_sent: AtomicU64::new(0),
            keepalives_sent: AtomicU64::new(0),
            clients_connected: AtomicU64::new(0),
            clients_disconnected: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            expired_tokens: AtomicU64::new(0),
            invalid_tokens: AtomicU64::new(0),
            replayed_tokens: AtomicU64::new(0),
            challenge_mismatches: AtomicU64::new(0),
            unexpected_packets: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn challenge_sent(&self) {
        self.challenges_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn denial_sent(&self) {
        self.denials_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn keepalive_sent(&self) {
        self.keepalives_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_connected(&self) {
        self.clients_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_disconnected(&self) {
        self.clients_disconnected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a silent drop
    pub fn dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Malformed => &self.decode_failures,
            DropReason::ExpiredToken => &self.expired_tokens,
            DropReason::InvalidToken => &self.invalid_tokens,
            DropReason::ReplayedToken => &self.replayed_tokens,
            DropReason::ChallengeMismatch => &self.challenge_mismatches,
            DropReason::Unexpected => &self.unexpected_packets,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            challenges_sent: self.challenges_sent.load(Ordering::Relaxed),
            denials_sent: self.denials_sent.load(Ordering::Relaxed),
            keepalives_sent: self.keepalives_sent.load(Ordering::Relaxed),
            clients_connected: self.clients_connected.load(Ordering::Relaxed),
            clients_disconnected: self.clients_disconnected.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            expired_tokens: self.expired_tokens.load(Ordering::Relaxed),
            invalid_tokens: self.invalid_tokens.load(Ordering::Relaxed),
            replayed_tokens: self.replayed_tokens.load(Ordering::Relaxed),
            challenge_mismatches: self.challenge_mismatches.load(Ordering::Relaxed),
            unexpected_packets: self.unexpected_packets.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            requests_received = snapshot.requests_received,
            challenges_sent = snapshot.challenges_sent,
            denials_sent = snapshot.denials_sent,
            keepalives_sent = snapshot.keepalives_sent,
            clients_connected = snapshot.clients_connected,
            clients_disconnected = snapshot.clients_disconnected,
            timeouts = snapshot.timeouts,
            decode_failures = snapshot.decode_failures,
            expired_tokens = snapshot.expired_tokens,
            invalid_tokens = snapshot.invalid_tokens,
            replayed_tokens = snapshot.replayed_tokens,
            challenge_mismatches = snapshot.challenge_mismatches,
            unexpected_packets = snapshot.unexpected_packets,
            uptime_seconds = snapshot.uptime_seconds,
            "Handshake metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub challenges_sent: u64,
    pub denials_sent: u64,
    pub keepalives_sent: u64,
    pub clients_connected: u64,
    pub clients_disconnected: u64,
    pub timeouts: u64,
    pub decode_failures: u64,
    pub expired_tokens: u64,
    pub invalid_tokens: u64,
    pub replayed_tokens: u64,
    pub challenge_mismatches: u64,
    pub unexpected_packets: u64,
    pub uptime_seconds: u64,
}

impl MetricsSnapshot {
    /// Every packet dropped without a reply, across all causes
    pub fn silent_drops(&self) -> u64 {
        self.decode_failures
            + self.expired_tokens
            + self.invalid_tokens
            + self.replayed_tokens
            + self.challenge_mismatches
            + self.unexpected_packets
    }
}
