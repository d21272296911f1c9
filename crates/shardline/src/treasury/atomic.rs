use crate::{
    CoinStatus, TimeSource, Treasury,
    time::as_millis,
    treasury::interface::{NEVER_GRANTED, remaining},
};
use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A lock-free [`Treasury`] backed by a single [`AtomicU64`].
///
/// The last grant time is the only state. A request reads it, checks the
/// interval, and tries to swap in its own timestamp with one
/// compare-and-swap. Exactly one of any number of racing callers can win that
/// swap; the rest are denied.
///
/// ## Recommended When
/// - Many workers poll for coins at the same time
/// - Denied callers are expected to retry anyway, so fairness is not needed
///
/// ## See Also
/// - [`LockTreasury`]
///
/// [`LockTreasury`]: crate::LockTreasury
pub struct AtomicTreasury<T>
where
    T: TimeSource<u64>,
{
    #[cfg(feature = "cache-padded")]
    last_grant: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    last_grant: AtomicU64,
    interval: u64,
    time: T,
}

impl<T> AtomicTreasury<T>
where
    T: TimeSource<u64>,
{
    /// Creates a treasury whose first coin is immediately available.
    ///
    /// # Example
    /// ```
    /// use core::time::Duration;
    /// use shardline::{AtomicTreasury, ManualClock, Treasury};
    ///
    /// let treasury = AtomicTreasury::new(Duration::from_secs(5), ManualClock::new(0));
    /// assert!(treasury.poll_coin().is_granted());
    /// assert!(!treasury.poll_coin().is_granted());
    /// ```
    pub fn new(min_interval: Duration, time: T) -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            last_grant: crossbeam_utils::CachePadded::new(AtomicU64::new(NEVER_GRANTED)),
            #[cfg(not(feature = "cache-padded"))]
            last_grant: AtomicU64::new(NEVER_GRANTED),
            interval: as_millis(min_interval),
            time,
        }
    }

    /// Tries to take the coin for the current interval.
    ///
    /// The clock is read after the previous grant is loaded, so the stamp a
    /// winner records is never older than the state it checked. A thread that
    /// stalls between that read and the swap can still record a stamp slightly
    /// behind the moment the swap lands. [`LockTreasury`] reads the clock
    /// under its lock and has no such gap.
    ///
    /// [`LockTreasury`]: crate::LockTreasury
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn poll_coin(&self) -> CoinStatus {
        let last = self.last_grant.load(Ordering::Acquire);
        let now = self.time.current_millis();

        if let Some(retry_in) = remaining(last, self.interval, now) {
            return CoinStatus::Denied { retry_in };
        }

        match self
            .last_grant
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => CoinStatus::Granted { at: now },
            // Another caller took this interval between our load and swap.
            Err(winner) => CoinStatus::Denied {
                retry_in: remaining(winner, self.interval, now).unwrap_or(self.interval),
            },
        }
    }

    pub fn last_grant(&self) -> Option<u64> {
        let last = self.last_grant.load(Ordering::Acquire);
        (last != NEVER_GRANTED).then_some(last)
    }
}

impl<T> Treasury<T> for AtomicTreasury<T>
where
    T: TimeSource<u64> + Send + Sync,
{
    fn new(min_interval: Duration, time: T) -> Self {
        Self::new(min_interval, time)
    }

    fn poll_coin(&self) -> CoinStatus {
        self.poll_coin()
    }

    fn last_grant(&self) -> Option<u64> {
        self.last_grant()
    }

    fn min_interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }
}
