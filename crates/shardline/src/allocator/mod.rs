//! The allocation registry.
//!
//! [`Allocator`] is the single source of truth for which worker owns which
//! chunk. It hands out chunks and staggered start times, answers lookups, and
//! evicts allocations whose heartbeat lapsed.
//!
//! ## Locking
//!
//! - One registry mutex guards the key map, the chunk map and the stagger
//!   window. Chunk selection, insertion and eviction all happen under it.
//! - Each [`Allocation`] has its own mutex for its heartbeat and report.
//!   Heartbeats and reports hold the registry mutex only long enough to clone
//!   the allocation handle; the liveness check and update run under the
//!   allocation's mutex alone.
//! - When both are held, the registry is always locked first.

mod stagger;

use crate::{
    Allocation, AllocationSnapshot, Error, OrchestratorConfig, Result, ShardReport, TimeSource,
    error::require_non_empty, time::as_millis,
};
use parking_lot::Mutex;
use stagger::StaggerWindow;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Debug, Default)]
struct Registry {
    by_key: HashMap<String, Arc<Allocation>>,
    by_chunk: BTreeMap<u32, String>,
    stagger: StaggerWindow,
}

impl Registry {
    /// The lowest chunk index not held by any registry entry.
    fn lowest_free_chunk(&self) -> u32 {
        let mut candidate = 0;
        for &held in self.by_chunk.keys() {
            if held != candidate {
                break;
            }
            candidate += 1;
        }
        candidate
    }

    fn insert(&mut self, allocation: Arc<Allocation>) -> Result<()> {
        if let Some(holder) = self.by_chunk.get(&allocation.chunk()) {
            #[cfg(feature = "tracing")]
            tracing::error!(
                chunk = allocation.chunk(),
                holder = %holder,
                claimant = allocation.key(),
                "Chunk collision in allocation registry"
            );
            debug_assert!(false, "chunk {} assigned twice", allocation.chunk());
            return Err(Error::ChunkCollision {
                chunk: allocation.chunk(),
                holder: holder.clone(),
                claimant: allocation.key().to_owned(),
            });
        }

        self.by_chunk
            .insert(allocation.chunk(), allocation.key().to_owned());
        self.by_key
            .insert(allocation.key().to_owned(), allocation);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Option<Arc<Allocation>> {
        let allocation = self.by_key.remove(key)?;
        self.by_chunk.remove(&allocation.chunk());
        Some(allocation)
    }
}

/// Registry of live allocations keyed by worker key.
pub struct Allocator<T>
where
    T: TimeSource<u64>,
{
    registry: Mutex<Registry>,
    liveness_timeout: u64,
    stagger_stride: u64,
    report_counts_as_heartbeat: bool,
    time: T,
}

impl<T> Allocator<T>
where
    T: TimeSource<u64>,
{
    pub fn new(config: &OrchestratorConfig, time: T) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            liveness_timeout: as_millis(config.liveness_timeout),
            stagger_stride: as_millis(config.stagger_stride),
            report_counts_as_heartbeat: config.report_counts_as_heartbeat,
            time,
        }
    }

    /// Returns the live allocation for `key`, creating one if needed.
    ///
    /// While the worker's allocation is alive, repeated calls return the same
    /// record, with the same chunk and the same start time. Otherwise the
    /// worker gets the lowest free chunk and the next slot of the stagger
    /// window, and its heartbeat starts at `now`.
    ///
    /// An allocation that timed out but was not reaped yet is retired here
    /// and replaced, exactly as if the reaper had run first.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `key` is empty.
    /// - [`Error::ChunkCollision`] if the registry invariants are broken.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn allocate(&self, key: &str) -> Result<Arc<Allocation>> {
        require_non_empty("key", key)?;

        let mut registry = self.registry.lock();
        // Read under the lock so stagger slots follow lock order.
        let now = self.time.current_millis();

        if let Some(existing) = registry.by_key.get(key) {
            if !existing.evict_if_expired(now, self.liveness_timeout) {
                return Ok(Arc::clone(existing));
            }
            registry.remove(key);
            #[cfg(feature = "tracing")]
            tracing::info!(key, "Replacing expired allocation");
        }

        let chunk = registry.lowest_free_chunk();
        let start = registry.stagger.claim(now, self.stagger_stride);
        let allocation = Arc::new(Allocation::new(key.to_owned(), chunk, start, now));
        registry.insert(Arc::clone(&allocation))?;

        #[cfg(feature = "tracing")]
        tracing::info!(
            key,
            chunk,
            delay_ms = start.saturating_sub(now),
            "Allocated chunk"
        );

        Ok(allocation)
    }

    /// Looks up the live allocation for `key`.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if the key was never allocated, was reaped, or has
    /// timed out.
    pub fn get_allocation(&self, key: &str) -> Result<Arc<Allocation>> {
        let allocation = self.lookup(key)?;
        let now = self.time.current_millis();
        if allocation.is_live(now, self.liveness_timeout) {
            Ok(allocation)
        } else {
            Err(Error::not_found(key))
        }
    }

    /// Clones the registry entry for `key`, live or not.
    fn lookup(&self, key: &str) -> Result<Arc<Allocation>> {
        self.registry
            .lock()
            .by_key
            .get(key)
            .cloned()
            .ok_or_else(|| Error::not_found(key))
    }

    /// Records a liveness signal for `key`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `key` is empty.
    /// - [`Error::NotFound`] if there is no live allocation.
    ///
    /// The registry is left unchanged on error.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn heartbeat(&self, key: &str) -> Result<()> {
        require_non_empty("key", key)?;
        let allocation = self.lookup(key)?;
        let now = self.time.current_millis();
        if allocation.beat(now, self.liveness_timeout) {
            Ok(())
        } else {
            Err(Error::not_found(key))
        }
    }

    /// Replaces the latest report for `key`.
    ///
    /// Also refreshes the heartbeat when the allocator was configured with
    /// `report_counts_as_heartbeat`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if `key` is empty.
    /// - [`Error::NotFound`] if there is no live allocation.
    ///
    /// The registry is left unchanged on error.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, reports), fields(reports = reports.len())))]
    pub fn submit_report(&self, key: &str, reports: Vec<ShardReport>) -> Result<()> {
        require_non_empty("key", key)?;
        let allocation = self.lookup(key)?;
        let now = self.time.current_millis();
        if allocation.replace_report(
            reports,
            now,
            self.liveness_timeout,
            self.report_counts_as_heartbeat,
        ) {
            Ok(())
        } else {
            Err(Error::not_found(key))
        }
    }

    /// Evicts every allocation whose heartbeat is older than the liveness
    /// timeout and returns them. Their chunks become free immediately.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self)))]
    pub fn reap(&self) -> Vec<Arc<Allocation>> {
        let mut registry = self.registry.lock();
        let now = self.time.current_millis();
        let timeout = self.liveness_timeout;

        let Registry {
            by_key, by_chunk, ..
        } = &mut *registry;
        let mut reaped = Vec::new();
        by_key.retain(|_, allocation| {
            if allocation.evict_if_expired(now, timeout) {
                by_chunk.remove(&allocation.chunk());
                reaped.push(Arc::clone(allocation));
                false
            } else {
                true
            }
        });

        #[cfg(feature = "tracing")]
        for allocation in &reaped {
            tracing::warn!(
                key = allocation.key(),
                chunk = allocation.chunk(),
                silent_ms = now.saturating_sub(allocation.last_heartbeat()),
                "Reaped allocation"
            );
        }

        reaped
    }

    /// Snapshots every registry entry, ordered by chunk.
    pub fn snapshot(&self) -> Vec<AllocationSnapshot> {
        let registry = self.registry.lock();
        let now = self.time.current_millis();
        registry
            .by_chunk
            .values()
            .filter_map(|key| registry.by_key.get(key))
            .map(|allocation| allocation.snapshot(now, self.liveness_timeout))
            .collect()
    }

    /// Number of registry entries, including expired ones not yet reaped.
    pub fn len(&self) -> usize {
        self.registry.lock().by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn now(&self) -> u64 {
        self.time.current_millis()
    }
}
