use crate::{
    CoinStatus, TimeSource, Treasury,
    time::as_millis,
    treasury::interface::{NEVER_GRANTED, remaining},
};
use core::time::Duration;
use parking_lot::Mutex;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// A mutex-guarded [`Treasury`].
///
/// The clock is read and the last grant time is checked and updated while the
/// lock is held, so callers are served in the order they acquire the lock.
///
/// ## Recommended When
/// - You want requests to be decided in lock acquisition order
/// - Contention is moderate
///
/// ## See Also
/// - [`AtomicTreasury`]
///
/// [`AtomicTreasury`]: crate::AtomicTreasury
pub struct LockTreasury<T>
where
    T: TimeSource<u64>,
{
    #[cfg(feature = "cache-padded")]
    last_grant: crossbeam_utils::CachePadded<Mutex<u64>>,
    #[cfg(not(feature = "cache-padded"))]
    last_grant: Mutex<u64>,
    interval: u64,
    time: T,
}

impl<T> LockTreasury<T>
where
    T: TimeSource<u64>,
{
    pub fn new(min_interval: Duration, time: T) -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            last_grant: crossbeam_utils::CachePadded::new(Mutex::new(NEVER_GRANTED)),
            #[cfg(not(feature = "cache-padded"))]
            last_grant: Mutex::new(NEVER_GRANTED),
            interval: as_millis(min_interval),
            time,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn poll_coin(&self) -> CoinStatus {
        let mut last = self.last_grant.lock();
        // Read under the lock so grant times follow lock order.
        let now = self.time.current_millis();

        if let Some(retry_in) = remaining(*last, self.interval, now) {
            return CoinStatus::Denied { retry_in };
        }

        *last = now;
        CoinStatus::Granted { at: now }
    }

    pub fn last_grant(&self) -> Option<u64> {
        let last = *self.last_grant.lock();
        (last != NEVER_GRANTED).then_some(last)
    }
}

impl<T> Treasury<T> for LockTreasury<T>
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
