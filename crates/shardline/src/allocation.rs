use parking_lot::Mutex;

/// Status of one sub-shard as reported by the worker that runs it.
///
/// The orchestrator stores these verbatim and only reads `guilds` and `users`
/// when it aggregates the swarm status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase", default))]
pub struct ShardReport {
    pub shard_id: u32,
    pub status: String,
    pub guilds: u64,
    pub users: u64,
}

/// Lifecycle position of an [`Allocation`].
///
/// `Pending -> Active -> Expired`. There is no way back from `Expired`: a
/// worker that returns after expiry is allocated from scratch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AllocationState {
    /// Allocated, but the assigned start time has not been reached.
    Pending,
    /// Past its start time and heartbeating within the liveness timeout.
    Active,
    /// Missed the liveness timeout, or already evicted.
    Expired,
}

#[derive(Debug)]
struct Liveness {
    last_heartbeat: u64,
    latest_report: Vec<ShardReport>,
    evicted: bool,
}

/// The record binding a worker key to its chunk.
///
/// `key`, `chunk` and `assigned_start_time` are fixed at creation. The
/// heartbeat and report live behind a per-allocation lock so that unrelated
/// workers never wait on each other, and so that eviction and heartbeats on
/// the same allocation are strictly ordered.
#[derive(Debug)]
pub struct Allocation {
    key: String,
    chunk: u32,
    assigned_start_time: u64,
    liveness: Mutex<Liveness>,
}

/// A consistent copy of an [`Allocation`] taken under its lock.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AllocationSnapshot {
    pub key: String,
    pub chunk: u32,
    pub assigned_start_time: u64,
    pub last_heartbeat: u64,
    pub state: AllocationState,
    pub latest_report: Vec<ShardReport>,
}

const fn is_expired(last_heartbeat: u64, now: u64, timeout: u64) -> bool {
    now.saturating_sub(last_heartbeat) > timeout
}

impl Allocation {
    pub(crate) fn new(key: String, chunk: u32, assigned_start_time: u64, now: u64) -> Self {
        Self {
            key,
            chunk,
            assigned_start_time,
            liveness: Mutex::new(Liveness {
                last_heartbeat: now,
                latest_report: Vec::new(),
                evicted: false,
            }),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub const fn chunk(&self) -> u32 {
        self.chunk
    }

    /// Milliseconds since the UNIX epoch before which the worker must not
    /// connect.
    pub const fn assigned_start_time(&self) -> u64 {
        self.assigned_start_time
    }

    pub fn last_heartbeat(&self) -> u64 {
        self.liveness.lock().last_heartbeat
    }

    pub fn latest_report(&self) -> Vec<ShardReport> {
        self.liveness.lock().latest_report.clone()
    }

    /// Whether the allocation has been removed from the registry.
    pub fn is_evicted(&self) -> bool {
        self.liveness.lock().evicted
    }

    pub fn state(&self, now: u64, timeout: u64) -> AllocationState {
        let liveness = self.liveness.lock();
        self.state_locked(&liveness, now, timeout)
    }

    pub fn snapshot(&self, now: u64, timeout: u64) -> AllocationSnapshot {
        let liveness = self.liveness.lock();
        AllocationSnapshot {
            key: self.key.clone(),
            chunk: self.chunk,
            assigned_start_time: self.assigned_start_time,
            last_heartbeat: liveness.last_heartbeat,
            state: self.state_locked(&liveness, now, timeout),
            latest_report: liveness.latest_report.clone(),
        }
    }

    fn state_locked(&self, liveness: &Liveness, now: u64, timeout: u64) -> AllocationState {
        if liveness.evicted || is_expired(liveness.last_heartbeat, now, timeout) {
            AllocationState::Expired
        } else if now < self.assigned_start_time {
            AllocationState::Pending
        } else {
            AllocationState::Active
        }
    }

    pub(crate) fn is_live(&self, now: u64, timeout: u64) -> bool {
        self.state(now, timeout) != AllocationState::Expired
    }

    /// Refreshes the heartbeat. Returns `false`, leaving the record untouched,
    /// if the allocation already expired.
    pub(crate) fn beat(&self, now: u64, timeout: u64) -> bool {
        let mut liveness = self.liveness.lock();
        if liveness.evicted || is_expired(liveness.last_heartbeat, now, timeout) {
            return false;
        }
        liveness.last_heartbeat = liveness.last_heartbeat.max(now);
        true
    }

    /// Replaces the stored report wholesale, optionally refreshing the
    /// heartbeat in the same critical section. Returns `false` if the
    /// allocation already expired.
    pub(crate) fn replace_report(
        &self,
        reports: Vec<ShardReport>,
        now: u64,
        timeout: u64,
        counts_as_heartbeat: bool,
    ) -> bool {
        let mut liveness = self.liveness.lock();
        if liveness.evicted || is_expired(liveness.last_heartbeat, now, timeout) {
            return false;
        }
        liveness.latest_report = reports;
        if counts_as_heartbeat {
            liveness.last_heartbeat = liveness.last_heartbeat.max(now);
        }
        true
    }

    /// Marks the allocation evicted if its heartbeat lapsed.
    ///
    /// The check and the mark happen under the allocation lock, so a
    /// concurrent [`Self::beat`] either lands first and keeps the allocation
    /// alive, or lands after and observes the eviction.
    pub(crate) fn evict_if_expired(&self, now: u64, timeout: u64) -> bool {
        let mut liveness = self.liveness.lock();
        if liveness.evicted {
            return false;
        }
        if is_expired(liveness.last_heartbeat, now, timeout) {
            liveness.evicted = true;
            return true;
        }
        false
    }
}
