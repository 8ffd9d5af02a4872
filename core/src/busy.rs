//! Busy-period tracking and long-run notification.
//!
//! Derives a "session is actively producing output" signal from externally
//! sampled timestamps and fires a single notification when a busy period
//! crosses the long-run threshold. The tracker never reads a clock: the
//! embedding application samples on its own tick and passes millisecond
//! timestamps in, which keeps the whole state machine deterministic.

use std::collections::HashMap;
use std::collections::HashSet;

use panesync_protocol::WorktreeId;

/// Suggested sampling cadence for the external tick driver.
pub const BUSY_TICK_MS: u64 = 300;
/// Output older than this no longer counts as "actively producing".
pub const BUSY_WINDOW_MS: u64 = 1_500;
/// Busy periods at least this long fire a notification when they end.
pub const LONG_RUN_THRESHOLD_MS: u64 = 10_000;

/// Per-session activity timestamps from which the busy signal is derived.
///
/// A session is busy at `now` when output arrived more recently than the last
/// user keystroke and within [`BUSY_WINDOW_MS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionActivity {
    last_output_ms: Option<u64>,
    last_input_ms: Option<u64>,
}

impl SessionActivity {
    pub fn note_output(&mut self, now_ms: u64) {
        self.last_output_ms = Some(now_ms);
    }

    pub fn note_input(&mut self, now_ms: u64) {
        self.last_input_ms = Some(now_ms);
    }

    pub fn is_busy(&self, now_ms: u64) -> bool {
        let Some(output) = self.last_output_ms else {
            return false;
        };
        if self.last_input_ms.is_some_and(|input| input >= output) {
            return false;
        }
        now_ms.saturating_sub(output) <= BUSY_WINDOW_MS
    }
}

#[derive(Debug, Default)]
struct BusyEntry {
    started_at_ms: Option<u64>,
    notified: bool,
}

/// Long-run notifier, keyed by logical session (worktree) id.
///
/// `update` is fed the sampled busy signal; it returns `true` exactly once
/// per busy period whose duration reached the threshold.
#[derive(Debug)]
pub struct BusyTracker {
    threshold_ms: u64,
    entries: HashMap<WorktreeId, BusyEntry>,
}

impl BusyTracker {
    pub fn new() -> Self {
        Self::with_threshold(LONG_RUN_THRESHOLD_MS)
    }

    pub fn with_threshold(threshold_ms: u64) -> Self {
        Self {
            threshold_ms,
            entries: HashMap::new(),
        }
    }

    pub fn update(&mut self, id: &WorktreeId, busy: bool, timestamp_ms: u64) -> bool {
        let entry = self.entries.entry(id.clone()).or_default();
        if busy {
            if entry.started_at_ms.is_none() {
                entry.started_at_ms = Some(timestamp_ms);
                entry.notified = false;
            }
            return false;
        }

        match entry.started_at_ms.take() {
            Some(started_at_ms) => {
                let elapsed = timestamp_ms.saturating_sub(started_at_ms);
                if elapsed >= self.threshold_ms && !entry.notified {
                    entry.notified = true;
                    true
                } else {
                    entry.notified = false;
                    false
                }
            }
            None => false,
        }
    }

    /// Drops tracking state for ids no longer relevant. A pruned id starts
    /// from scratch if it reappears, so a fresh busy/idle cycle can notify
    /// again.
    pub fn prune(&mut self, valid_ids: &HashSet<WorktreeId>) {
        self.entries.retain(|id, _| valid_ids.contains(id));
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}
