//! Opaque token references carried inside negotiation packets.
//!
//! This crate never decrypts or interprets these bytes. The external trust
//! component (see [`TokenAuthority`](crate::protocol::TokenAuthority)) mints
//! and opens them; the protocol only moves them between peers and, for
//! challenge tokens, compares them byte for byte.

use std::fmt;

/// Bytes in a token nonce
pub const NONCE_BYTES: usize = 8;

/// Bytes of encrypted connect token data
pub const CONNECT_TOKEN_BYTES: usize = 1024;

/// Bytes of encrypted challenge token data
pub const CHALLENGE_TOKEN_BYTES: usize = 256;

// Server replies to unauthenticated requests must stay smaller than the request.
const _: () = assert!(CHALLENGE_TOKEN_BYTES + NONCE_BYTES < 8 + CONNECT_TOKEN_BYTES + NONCE_BYTES);

/// Nonce paired with a token's ciphertext. Opaque to this crate.
pub type TokenNonce = [u8; NONCE_BYTES];

/// Connect token as presented in a `ConnectionRequest`
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTokenRef {
    /// Absolute expiry, seconds since the UNIX epoch
    pub expire_timestamp: u64,
    pub data: Box<[u8; CONNECT_TOKEN_BYTES]>,
    pub nonce: TokenNonce,
}

impl ConnectTokenRef {
    pub fn new(expire_timestamp: u64, data: [u8; CONNECT_TOKEN_BYTES], nonce: TokenNonce) -> Self {
        Self {
            expire_timestamp,
            data: Box::new(data),
            nonce,
        }
    }

    /// A token is expired once the current time reaches its expiry
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.expire_timestamp <= now_secs
    }
}

impl Default for ConnectTokenRef {
    fn default() -> Self {
        Self {
            expire_timestamp: 0,
            data: Box::new([0u8; CONNECT_TOKEN_BYTES]),
            nonce: [0u8; NONCE_BYTES],
        }
    }
}

impl fmt::Debug for ConnectTokenRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTokenRef")
            .field("expire_timestamp", &self.expire_timestamp)
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}

/// Challenge token issued by the server and echoed back by the client
#[derive(Clone, PartialEq, Eq)]
pub struct ChallengeToken {
    pub data: [u8; CHALLENGE_TOKEN_BYTES],
    pub nonce: TokenNonce,
}

impl ChallengeToken {
    pub fn new(data: [u8; CHALLENGE_TOKEN_BYTES], nonce: TokenNonce) -> Self {
        Self { data, nonce }
    }
}

impl Default for ChallengeToken {
    fn default() -> Self {
        Self {
            data: [0u8; CHALLENGE_TOKEN_BYTES],
            nonce: [0u8; NONCE_BYTES],
        }
    }
}

impl fmt::Debug for ChallengeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeToken")
            .field("nonce", &self.nonce)
            .finish_non_exhaustive()
    }
}
