use crate::{
    Allocation, Allocator, AtomicTreasury, CoinStatus, LockTreasury, OrchestratorConfig,
    ReaperHandle, Result, ShardReport, SwarmStatus, TimeSource, Treasury, TreasuryKind,
    spawn_reaper,
};
use std::sync::Arc;
#[cfg(feature = "tracing")]
use tracing::instrument;

/// The orchestration core: one [`Allocator`] and one [`Treasury`] sharing a
/// clock and a configuration.
///
/// Build one at start-up, wrap it in an `Arc`, hand it to request handlers
/// and start its reaper with [`Orchestrator::spawn_reaper`].
///
/// # Example
///
/// ```
/// use shardline::{ManualClock, Orchestrator, OrchestratorConfig};
///
/// let orchestrator = Orchestrator::new(OrchestratorConfig::default(), ManualClock::new(0))?;
///
/// let allocation = orchestrator.allocate("worker-a")?;
/// assert_eq!(allocation.chunk(), 0);
/// assert!(orchestrator.request_coin("worker-a")?);
/// assert!(!orchestrator.request_coin("worker-b")?);
/// orchestrator.heartbeat("worker-a")?;
/// assert_eq!(orchestrator.status().allocations, 1);
/// # Ok::<(), shardline::Error>(())
/// ```
pub struct Orchestrator<T>
where
    T: TimeSource<u64> + Send + Sync + 'static,
{
    config: OrchestratorConfig,
    allocator: Arc<Allocator<T>>,
    treasury: Box<dyn Treasury<T>>,
}

impl<T> Orchestrator<T>
where
    T: TimeSource<u64> + Clone + Send + Sync + 'static,
{
    /// Validates `config` and builds the allocator and the treasury it asks
    /// for.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`](crate::Error::InvalidConfig) if `config` does
    /// not validate.
    pub fn new(config: OrchestratorConfig, time: T) -> Result<Self> {
        config.validate()?;

        let treasury: Box<dyn Treasury<T>> = match config.treasury {
            TreasuryKind::Atomic => Box::new(AtomicTreasury::new(
                config.min_coin_interval,
                time.clone(),
            )),
            TreasuryKind::Lock => {
                Box::new(LockTreasury::new(config.min_coin_interval, time.clone()))
            }
        };
        let allocator = Arc::new(Allocator::new(&config, time));

        #[cfg(feature = "tracing")]
        tracing::info!(
            treasury = ?config.treasury,
            min_coin_interval_ms = treasury.min_interval().as_millis() as u64,
            liveness_timeout_ms = config.liveness_timeout.as_millis() as u64,
            stagger_stride_ms = config.stagger_stride.as_millis() as u64,
            report_counts_as_heartbeat = config.report_counts_as_heartbeat,
            "Orchestrator ready"
        );

        Ok(Self {
            config,
            allocator,
            treasury,
        })
    }
}

impl<T> Orchestrator<T>
where
    T: TimeSource<u64> + Send + Sync + 'static,
{
    /// See [`Allocator::allocate`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`](crate::Error::InvalidRequest) on an empty
    /// key.
    pub fn allocate(&self, key: &str) -> Result<Arc<Allocation>> {
        self.allocator.allocate(key)
    }

    /// Asks the treasury for a coin on behalf of `identity`. `true` means the
    /// caller may connect now; `false` means try again later.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`](crate::Error::InvalidRequest) on an empty
    /// identity.
    pub fn request_coin(&self, identity: &str) -> Result<bool> {
        self.poll_coin(identity).map(|status| status.is_granted())
    }

    /// Like [`Self::request_coin`], but keeps the retry hint of a denial.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`](crate::Error::InvalidRequest) on an empty
    /// identity.
    pub fn poll_coin(&self, identity: &str) -> Result<CoinStatus> {
        self.treasury.request_coin(identity)
    }

    /// See [`Allocator::heartbeat`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) without a live allocation.
    pub fn heartbeat(&self, key: &str) -> Result<()> {
        self.allocator.heartbeat(key)
    }

    /// See [`Allocator::submit_report`].
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`](crate::Error::NotFound) without a live allocation.
    pub fn submit_report(&self, key: &str, reports: Vec<ShardReport>) -> Result<()> {
        self.allocator.submit_report(key, reports)
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn status(&self) -> SwarmStatus {
        let snapshots = self.allocator.snapshot();
        SwarmStatus::from_snapshots(snapshots, self.treasury.last_grant(), self.allocator.now())
    }

    /// Runs one eviction sweep right away. The background reaper calls the
    /// same thing on a timer.
    pub fn reap(&self) -> Vec<Arc<Allocation>> {
        self.allocator.reap()
    }

    /// Starts the background reaper at the configured `reap_interval`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_reaper<F>(&self, on_reap: F) -> ReaperHandle
    where
        F: Fn(&[Arc<Allocation>]) + Send + 'static,
    {
        spawn_reaper(
            Arc::clone(&self.allocator),
            self.config.reap_interval,
            on_reap,
        )
    }

    pub fn allocator(&self) -> &Arc<Allocator<T>> {
        &self.allocator
    }

    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }
}
