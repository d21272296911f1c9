use crate::{AllocationSnapshot, AllocationState};

/// One row of the swarm summary.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct AllocationSummary {
    pub key: String,
    pub chunk: u32,
    pub state: AllocationState,
    pub assigned_start_time: u64,
    pub last_heartbeat: u64,
    /// Number of entries in the latest report.
    pub report_count: usize,
}

/// Aggregate view of the swarm at one instant.
///
/// Counts and sums only cover live allocations. Allocations that timed out
/// but have not been reaped yet still get a row, in the
/// [`AllocationState::Expired`] state, so operators can see them go.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct SwarmStatus {
    /// When the summary was taken, in milliseconds since the UNIX epoch.
    pub generated_at: u64,
    /// Live allocations (pending plus active).
    pub allocations: usize,
    pub pending: usize,
    pub active: usize,
    /// Timed out, waiting for the reaper.
    pub expired: usize,
    pub highest_chunk: Option<u32>,
    pub shards_reported: usize,
    pub guilds: u64,
    pub users: u64,
    pub last_coin_grant: Option<u64>,
    /// One row per registry entry, ordered by chunk.
    pub rows: Vec<AllocationSummary>,
}

impl SwarmStatus {
    /// Folds allocation snapshots into a summary.
    pub fn from_snapshots(
        snapshots: Vec<AllocationSnapshot>,
        last_coin_grant: Option<u64>,
        generated_at: u64,
    ) -> Self {
        let mut status = Self {
            generated_at,
            last_coin_grant,
            rows: Vec::with_capacity(snapshots.len()),
            ..Self::default()
        };

        for snapshot in snapshots {
            match snapshot.state {
                AllocationState::Pending => status.pending += 1,
                AllocationState::Active => status.active += 1,
                AllocationState::Expired => status.expired += 1,
            }

            if snapshot.state != AllocationState::Expired {
                status.allocations += 1;
                status.highest_chunk = status.highest_chunk.max(Some(snapshot.chunk));
                status.shards_reported += snapshot.latest_report.len();
                for report in &snapshot.latest_report {
                    status.guilds = status.guilds.saturating_add(report.guilds);
                    status.users = status.users.saturating_add(report.users);
                }
            }

            status.rows.push(AllocationSummary {
                report_count: snapshot.latest_report.len(),
                key: snapshot.key,
                chunk: snapshot.chunk,
                state: snapshot.state,
                assigned_start_time: snapshot.assigned_start_time,
                last_heartbeat: snapshot.last_heartbeat,
            });
        }

        status
    }

    /// Whether no live allocation exists.
    pub const fn is_idle(&self) -> bool {
        self.allocations == 0
    }
}
