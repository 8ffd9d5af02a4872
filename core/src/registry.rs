//! Reference-counted registry of terminal-view instances.
//!
//! A view widget is expensive to rebuild, so it outlives the pane that
//! created it: when the last pane releases an instance the entry lingers for
//! a grace period and is only dropped by a later sweep. Sweeps are driven by
//! the embedding application's tick, never by an internal timer, which keeps
//! teardown deterministic under test.

use std::collections::HashMap;

use crate::view::SharedView;

/// How long a fully released view survives before a sweep may evict it.
pub const VIEW_LINGER_MS: u64 = 30_000;

/// Key of one view instance. Opaque to the registry; callers typically derive
/// it from the worktree the view renders.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ViewInstanceId(pub String);

impl ViewInstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

struct ViewEntry {
    view: SharedView,
    refcount: usize,
    released_at: Option<u64>,
}

pub struct ViewRegistry {
    entries: HashMap<ViewInstanceId, ViewEntry>,
    linger_ms: u64,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::with_linger(VIEW_LINGER_MS)
    }

    pub fn with_linger(linger_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            linger_ms,
        }
    }

    /// Registers a view under `id` with one reference held by the caller.
    /// Re-inserting over a live entry replaces the view and resets the count.
    pub fn insert(&mut self, id: ViewInstanceId, view: SharedView) -> SharedView {
        self.entries.insert(
            id,
            ViewEntry {
                view: SharedView::clone(&view),
                refcount: 1,
                released_at: None,
            },
        );
        view
    }

    /// Takes an additional reference on an existing entry, reviving it if it
    /// was lingering.
    pub fn acquire(&mut self, id: &ViewInstanceId) -> Option<SharedView> {
        let entry = self.entries.get_mut(id)?;
        entry.refcount += 1;
        entry.released_at = None;
        Some(SharedView::clone(&entry.view))
    }

    /// Drops one reference. When the count reaches zero the entry is marked
    /// released at `now_ms` and becomes a sweep candidate after the linger
    /// period.
    pub fn release(&mut self, id: &ViewInstanceId, now_ms: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entry.released_at = Some(now_ms);
            }
        }
    }

    /// Evicts entries whose linger period has elapsed; returns how many were
    /// dropped.
    pub fn sweep(&mut self, now_ms: u64) -> usize {
        let linger = self.linger_ms;
        let before = self.entries.len();
        self.entries.retain(|_, entry| {
            entry
                .released_at
                .is_none_or(|released| now_ms.saturating_sub(released) < linger)
        });
        before - self.entries.len()
    }

    pub fn contains(&self, id: &ViewInstanceId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ViewRegistry {
    fn default() -> Self {
        Self::new()
    }
}
