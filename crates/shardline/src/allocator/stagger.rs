/// Spaces out start times handed to workers allocated in the same burst.
///
/// A window opens with the first allocation after a quiet period. The `n`th
/// allocation in the window (counting from zero) starts at
/// `opened_at + n * stride`. The window closes once the next slot it would
/// hand out is no longer in the future, i.e. once every start time it issued
/// has passed. The next allocation then opens a fresh window at `now`.
///
/// Slots are strictly increasing across windows: a new window opens at a
/// `now` that is at or past the old window's next slot.
#[derive(Debug, Default)]
pub(crate) struct StaggerWindow {
    opened_at: u64,
    granted: u64,
}

impl StaggerWindow {
    fn next_slot_at(&self, stride: u64) -> u64 {
        self.opened_at
            .saturating_add(self.granted.saturating_mul(stride))
    }

    /// Claims the next start time. Must be called under the registry lock.
    pub(crate) fn claim(&mut self, now: u64, stride: u64) -> u64 {
        if self.granted == 0 || now >= self.next_slot_at(stride) {
            self.opened_at = now;
            self.granted = 0;
        }
        let slot = self.next_slot_at(stride);
        self.granted += 1;
        slot
    }

    /// Number of start times issued by the current window.
    #[cfg(test)]
    pub(crate) const fn granted(&self) -> u64 {
        self.granted
    }
}
