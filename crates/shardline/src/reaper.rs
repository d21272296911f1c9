//! Background eviction of silent workers.
//!
//! The reaper is a Tokio task that calls [`Allocator::reap`] every
//! `reap_interval` until it is cancelled. Anything it evicts is handed to an
//! `on_reap` callback, which the server uses for metrics.

use crate::{Allocation, Allocator, TimeSource};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    task::{JoinError, JoinHandle},
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;

/// Handle to a running reaper task.
#[derive(Debug)]
pub struct ReaperHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReaperHandle {
    /// A token that stops the reaper when cancelled. Clones of it may be
    /// shared with other shutdown paths.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the task has exited, through shutdown or a panic.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the reaper and waits for the task to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] if the task panicked.
    pub async fn shutdown(self) -> Result<(), JoinError> {
        self.token.cancel();
        self.handle.await
    }
}

/// Spawns the reaper on the current Tokio runtime.
///
/// The first sweep happens one `period` after spawning, not immediately.
/// Sweeps that fall behind are delayed rather than bunched up.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime, or if `period` is zero.
pub fn spawn_reaper<T, F>(
    allocator: Arc<Allocator<T>>,
    period: Duration,
    on_reap: F,
) -> ReaperHandle
where
    T: TimeSource<u64> + Send + Sync + 'static,
    F: Fn(&[Arc<Allocation>]) + Send + 'static,
{
    let token = CancellationToken::new();
    let handle = tokio::spawn(reaper_loop(allocator, period, token.clone(), on_reap));
    ReaperHandle { token, handle }
}

async fn reaper_loop<T, F>(
    allocator: Arc<Allocator<T>>,
    period: Duration,
    token: CancellationToken,
    on_reap: F,
) where
    T: TimeSource<u64> + Send + Sync + 'static,
    F: Fn(&[Arc<Allocation>]),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // `interval` fires immediately; skip that so a fresh registry gets a full
    // period before the first sweep.
    ticker.tick().await;

    #[cfg(feature = "tracing")]
    tracing::debug!(period_ms = period.as_millis() as u64, "Reaper started");

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let reaped = allocator.reap();
                if !reaped.is_empty() {
                    on_reap(&reaped);
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::debug!("Reaper stopped");
}
