//! Replay Cache for Connect Token Protection
//!
//! This module implements a TTL-based cache that binds each connect token
//! nonce to the first source address that presented it. A token captured
//! off the wire and replayed from a different address is rejected while the
//! binding lives; the legitimate client may keep retrying from its own
//! address.
//!
//! The cache automatically expires entries to prevent unbounded growth while
//! maintaining security guarantees.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::token::TokenNonce;
use crate::utils::time::elapsed;

/// Cache entry for a seen token nonce
#[derive(Debug, Clone)]
struct CacheEntry {
    /// When this entry was added to the cache
    added_at: Duration,
    /// The address that first presented the nonce
    address: SocketAddr,
}

/// TTL-based replay cache with automatic expiration and O(1) eviction
///
/// Uses VecDeque to track insertion order for constant-time removal of oldest
/// entries when the cache reaches capacity.
#[derive(Debug)]
pub struct ReplayCache {
    /// Internal storage mapping nonces to entries
    entries: HashMap<TokenNonce, CacheEntry>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<TokenNonce>,
    /// Time-to-live for cache entries
    ttl: Duration,
    /// Maximum number of entries to prevent unbounded growth
    max_entries: usize,
}

impl ReplayCache {
    /// Create a replay cache with the given binding lifetime and capacity
    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Check whether `nonce` is bound to an address other than `address`
    ///
    /// Returns true if the nonce is a replay from elsewhere, false otherwise.
    /// A fresh nonce is recorded against `address`.
    #[instrument(level = "debug", skip(self, nonce))]
    pub fn is_replay(&mut self, nonce: &TokenNonce, address: SocketAddr, now: Duration) -> bool {
        self.cleanup_expired(now);

        if let Some(entry) = self.entries.get(nonce) {
            if entry.address != address {
                warn!(
                    %address,
                    first_address = %entry.address,
                    ?nonce,
                    "Connect token replayed from a different address"
                );
                return true;
            }
            debug!(%address, "Connect token retried from its original address");
            return false;
        }

        if self.entries.len() >= self.max_entries {
            let to_remove = self.entries.len() - self.max_entries + 1;
            self.remove_oldest_entries(to_remove);
        }

        self.entries.insert(
            *nonce,
            CacheEntry {
                added_at: now,
                address,
            },
        );
        self.insertion_order.push_back(*nonce);
        debug!(%address, ?nonce, "New connect token nonce cached");

        false
    }

    /// Remove expired entries from the cache
    fn cleanup_expired(&mut self, now: Duration) {
        let initial_count = self.entries.len();
        let ttl = self.ttl;

        self.entries
            .retain(|_, entry| elapsed(now, entry.added_at) < ttl);

        // Clean up insertion_order queue to match HashMap
        while let Some(nonce) = self.insertion_order.front() {
            if !self.entries.contains_key(nonce) {
                self.insertion_order.pop_front();
            } else {
                break;
            }
        }

        let removed = initial_count - self.entries.len();
        if removed > 0 {
            debug!("Cleaned up {} expired replay cache entries", removed);
        }
    }

    /// Remove oldest entries when cache is full using FIFO eviction
    #[inline]
    fn remove_oldest_entries(&mut self, count: usize) {
        let mut removed = 0;
        while removed < count {
            match self.insertion_order.pop_front() {
                Some(nonce) => {
                    if self.entries.remove(&nonce).is_some() {
                        removed += 1;
                    }
                }
                None => break,
            }
        }

        debug!(
            "Removed {} oldest replay cache entries due to size limit",
            removed
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}

/// Statistics about the replay cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Current number of entries
    pub entries: usize,
    /// Maximum allowed entries
    pub max_entries: usize,
    /// TTL in seconds
    pub ttl_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_replay_from_other_address_detected() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 100);
        let nonce = [1u8; 8];
        let now = Duration::from_secs(1_000);

        assert!(!cache.is_replay(&nonce, addr(1000), now));
        assert!(cache.is_replay(&nonce, addr(2000), now));
    }

    #[test]
    fn test_retry_from_same_address_allowed() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 100);
        let nonce = [1u8; 8];
        let now = Duration::from_secs(1_000);

        assert!(!cache.is_replay(&nonce, addr(1000), now));
        assert!(!cache.is_replay(&nonce, addr(1000), now + Duration::from_secs(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_nonce_allowed() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 100);
        let now = Duration::from_secs(1_000);

        assert!(!cache.is_replay(&[1u8; 8], addr(1000), now));
        assert!(!cache.is_replay(&[2u8; 8], addr(2000), now));
    }

    #[test]
    fn test_expiration() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(10), 100);
        let nonce = [1u8; 8];
        let now = Duration::from_secs(1_000);

        assert!(!cache.is_replay(&nonce, addr(1000), now));

        // binding expired, a new address may claim the nonce
        let later = now + Duration::from_secs(11);
        assert!(!cache.is_replay(&nonce, addr(2000), later));
        assert!(cache.is_replay(&nonce, addr(1000), later));
    }

    #[test]
    fn test_max_entries_limit() {
        let mut cache = ReplayCache::with_settings(Duration::from_secs(60), 5);
        let now = Duration::from_secs(1_000);

        for i in 0..10u8 {
            assert!(!cache.is_replay(&[i; 8], addr(1000 + u16::from(i)), now));
        }

        assert!(cache.len() <= 5);
        let stats = cache.stats();
        assert_eq!(stats.max_entries, 5);
        assert_eq!(stats.entries, cache.len());
        // the oldest bindings were evicted
        assert!(!cache.is_replay(&[0u8; 8], addr(9999), now));
    }
}
