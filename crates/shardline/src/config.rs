use crate::{Error, Result};
use core::time::Duration;

/// Default minimum spacing between two coin grants.
pub const DEFAULT_MIN_COIN_INTERVAL: Duration = Duration::from_millis(5_500);

/// Default time without a heartbeat after which an allocation is reaped.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Default spacing between start times handed to workers allocated in the
/// same burst.
pub const DEFAULT_STAGGER_STRIDE: Duration = Duration::from_millis(5_500);

/// Default period of the background reaper.
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Which [`Treasury`](crate::Treasury) implementation backs the orchestrator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TreasuryKind {
    /// Lock-free compare-and-swap on a single timestamp.
    #[default]
    Atomic,
    /// Mutex-guarded timestamp.
    Lock,
}

/// Tunables consumed by the orchestration core.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Two coins are never granted closer together than this.
    pub min_coin_interval: Duration,
    /// An allocation without a heartbeat for longer than this is expired.
    pub liveness_timeout: Duration,
    /// Spacing between start times of allocations made in the same burst.
    pub stagger_stride: Duration,
    /// How often the background reaper sweeps the registry.
    pub reap_interval: Duration,
    /// Whether submitting a report also refreshes the heartbeat.
    pub report_counts_as_heartbeat: bool,
    pub treasury: TreasuryKind,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            min_coin_interval: DEFAULT_MIN_COIN_INTERVAL,
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            stagger_stride: DEFAULT_STAGGER_STRIDE,
            reap_interval: DEFAULT_REAP_INTERVAL,
            report_counts_as_heartbeat: true,
            treasury: TreasuryKind::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Checks that every duration is usable.
    ///
    /// A zero stride would hand identical start times to a burst of workers,
    /// and a zero reap interval would spin the reaper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("min_coin_interval", self.min_coin_interval),
            ("liveness_timeout", self.liveness_timeout),
            ("stagger_stride", self.stagger_stride),
            ("reap_interval", self.reap_interval),
        ];

        for (field, value) in checks {
            if value.is_zero() {
                return Err(Error::InvalidConfig {
                    reason: format!("`{field}` must be greater than zero"),
                });
            }
        }

        Ok(())
    }
}
