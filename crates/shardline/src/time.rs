use core::time::Duration;
use portable_atomic::{AtomicU64, Ordering};
use std::{
    sync::{Arc, OnceLock},
    thread::{self, JoinHandle},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock time in **milliseconds since the UNIX epoch**.
///
/// Every timestamp the orchestrator hands out (`assigned_start_time`,
/// `last_heartbeat`, coin grant times) is read from a `TimeSource`, so tests
/// can swap in a [`ManualClock`] and drive time explicitly.
///
/// # Example
///
/// ```
/// use shardline::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource<u64> for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource<T> {
    /// Returns the current time in milliseconds since the UNIX epoch.
    fn current_millis(&self) -> T;
}

impl<T, S> TimeSource<T> for Arc<S>
where
    S: TimeSource<T> + ?Sized,
{
    fn current_millis(&self) -> T {
        (**self).current_millis()
    }
}

#[derive(Debug)]
struct SharedTickerInner {
    current: AtomicU64,
    _handle: OnceLock<JoinHandle<()>>,
}

/// A wall-clock aligned time source that never goes backwards.
///
/// At construction the clock samples `SystemTime::now()` once to find its
/// offset from the UNIX epoch. From then on a background ticker thread
/// advances a shared atomic counter once per millisecond using `Instant`, so
/// readings are cheap and unaffected by NTP steps or manual clock changes.
///
/// Clones share the same ticker. The thread exits once the last clone is
/// dropped.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    inner: Arc<SharedTickerInner>,
    epoch_offset: u64,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Starts a new ticker anchored to the current wall-clock time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock reports a time before the UNIX epoch.
    pub fn new() -> Self {
        let start = Instant::now();
        let offset = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock before UNIX_EPOCH")
            .as_millis() as u64;

        let inner = Arc::new(SharedTickerInner {
            current: AtomicU64::new(0),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let handle = thread::spawn(move || {
            let mut tick = 0;

            loop {
                let Some(inner_ref) = weak_inner.upgrade() else {
                    break;
                };

                let target = start + Duration::from_millis(tick);
                let now = Instant::now();
                if now < target {
                    thread::sleep(target - now);
                }

                let now_ms = start.elapsed().as_millis() as u64;
                inner_ref.current.store(now_ms, Ordering::Relaxed);
                tick = now_ms + 1;
            }
        });

        inner
            ._handle
            .set(handle)
            .expect("failed to set thread handle");

        Self {
            inner,
            epoch_offset: offset,
        }
    }
}

impl TimeSource<u64> for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.epoch_offset + self.inner.current.load(Ordering::Relaxed)
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same reading, so a test can hand one clone to the
/// orchestrator and keep another to advance time.
///
/// ```
/// use core::time::Duration;
/// use shardline::{ManualClock, TimeSource};
///
/// let clock = ManualClock::new(1_000);
/// let observer = clock.clone();
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(observer.current_millis(), 1_250);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    millis: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(millis)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::Release);
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(as_millis(by), Ordering::AcqRel);
    }
}

impl TimeSource<u64> for ManualClock {
    fn current_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}

/// Converts a [`Duration`] to whole milliseconds, saturating at `u64::MAX`.
pub(crate) fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_tracks_wall_clock() {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        let clock = MonotonicClock::new();
        let first = clock.current_millis();
        // Allow for scheduling noise between the two samples.
        assert!(first.abs_diff(wall) < 1_000);

        thread::sleep(Duration::from_millis(5));
        assert!(clock.current_millis() >= first);
    }

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        other.set(42);
        assert_eq!(clock.current_millis(), 42);
        clock.advance(Duration::from_millis(8));
        assert_eq!(other.current_millis(), 50);
    }

    #[test]
    fn as_millis_saturates() {
        assert_eq!(as_millis(Duration::from_millis(1_500)), 1_500);
        assert_eq!(as_millis(Duration::MAX), u64::MAX);
    }
}
