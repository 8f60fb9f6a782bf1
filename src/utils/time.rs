//! Wall-clock helpers and protocol timing defaults.
//!
//! The state machines never read the clock themselves. Callers pass the
//! current time as a [`Duration`] since the UNIX epoch, which keeps every
//! transition deterministic under test.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{constants, ProtocolError, Result};

/// Client resend cadence while negotiating
pub const RESEND_INTERVAL: Duration = Duration::from_millis(100);

/// How long a client keeps retrying one handshake stage
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the server keeps an unanswered challenge
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Silence after which an established connection is dropped
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Keep-alive cadence once connected
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(1);

/// Current time since the UNIX epoch
///
/// # Errors
/// Returns a `ProtocolError::Custom` if the system time is earlier than UNIX_EPOCH
pub fn unix_now() -> Result<Duration> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.into()))
}

/// Time elapsed from `since` to `now`, zero if the clock stepped backwards
#[inline]
pub fn elapsed(now: Duration, since: Duration) -> Duration {
    now.saturating_sub(since)
}
