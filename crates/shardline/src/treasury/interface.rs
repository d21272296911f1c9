use crate::{Result, TimeSource, error::require_non_empty};
use core::time::Duration;

/// Outcome of asking a [`Treasury`] for a coin.
///
/// A coin permits exactly one (re)connection attempt against the rate-limited
/// downstream system.
///
/// - [`CoinStatus::Granted`] means the caller won this interval and may
///   connect now.
/// - [`CoinStatus::Denied`] means another caller already holds the current
///   interval. Nothing is queued on the caller's behalf; it must ask again,
///   and `retry_in` is the earliest point (in milliseconds) at which asking
///   again could succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinStatus {
    Granted {
        /// Grant time, in milliseconds since the UNIX epoch.
        at: u64,
    },
    Denied {
        /// Milliseconds until the current interval closes.
        retry_in: u64,
    },
}

impl CoinStatus {
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted { .. })
    }
}

/// A process-wide rate limiter that grants at most one coin per
/// `min_interval`, regardless of who asks.
///
/// Implementations must perform the "has the interval elapsed?" check and the
/// update of the last grant time as a single atomic step: two concurrent
/// callers must never both observe an elapsed interval and both be granted.
pub trait Treasury<T>: Send + Sync
where
    T: TimeSource<u64>,
{
    /// Creates an empty treasury. The first request is always granted.
    fn new(min_interval: Duration, time: T) -> Self
    where
        Self: Sized;

    /// Attempts to take the coin for the current interval.
    fn poll_coin(&self) -> CoinStatus;

    /// Time of the most recent grant, if any coin was ever granted.
    fn last_grant(&self) -> Option<u64>;

    fn min_interval(&self) -> Duration;

    /// Validates `identity` and attempts to take a coin on its behalf.
    ///
    /// The identity is only used for logging; grants are first come, first
    /// served across all identities.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`](crate::Error::InvalidRequest) if
    /// `identity` is empty. No state is touched in that case.
    fn request_coin(&self, identity: &str) -> Result<CoinStatus> {
        require_non_empty("identity", identity)?;
        let status = self.poll_coin();

        #[cfg(feature = "tracing")]
        match status {
            CoinStatus::Granted { at } => {
                tracing::info!(identity, at, "Coin granted");
            }
            CoinStatus::Denied { retry_in } => {
                tracing::info!(identity, retry_in, "Coin denied");
            }
        }

        Ok(status)
    }
}

/// Sentinel for "no coin has been granted yet".
pub(crate) const NEVER_GRANTED: u64 = u64::MAX;

/// Milliseconds until a coin can be granted again, or `None` if one can be
/// granted at `now`.
pub(crate) fn remaining(last_grant: u64, interval: u64, now: u64) -> Option<u64> {
    if last_grant == NEVER_GRANTED {
        return None;
    }
    let reopens_at = last_grant.saturating_add(interval);
    (now < reopens_at).then(|| reopens_at - now)
}
