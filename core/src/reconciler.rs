//! Per-(pane, session) transcript reconciliation.
//!
//! A pane has no persistent memory of past output. It catches up with a full
//! snapshot when its cursor is unknown or stale, stays current by applying
//! live-pushed events when they are contiguous, and repairs detected gaps
//! with a bounded delta fetch. The push transport is at-least-once and may
//! drop messages; every event carries a monotonic id, so loss is detectable
//! and self-healing.
//!
//! All sync operations of one pane serialize through a single FIFO mutex: a
//! gap-fill issued while another fetch is in flight chains after it instead
//! of racing it, so writes reach the view in the order their triggering
//! requests were issued even when the underlying host calls complete out of
//! order. Distinct panes on the same session are fully independent.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use panesync_protocol::EventId;
use panesync_protocol::OutputEvent;
use panesync_protocol::PaneId;
use panesync_protocol::ResumeHandle;
use panesync_protocol::ViewportRecord;
use panesync_protocol::WorktreeId;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::yield_now;
use tracing::debug;
use tracing::warn;

use crate::echo::EchoSuppressor;
use crate::errors::SyncError;
use crate::host::SessionHost;
use crate::overlap::overlap;
use crate::resume::extract_resume_command;
use crate::view::SharedView;

/// Bytes of recently rendered output kept for boundary de-duplication.
pub const RENDER_TAIL_MAX_BYTES: usize = 4096;
/// Historical transcripts are written to the view in chunks of this size,
/// yielding between chunks so a large scrollback never blocks the loop.
pub const HYDRATION_CHUNK_BYTES: usize = 8192;

#[derive(Debug)]
struct SyncState {
    last_seen: EventId,
    needs_snapshot: bool,
    saved_viewport: ViewportRecord,
    rendered_tail: String,
}

/// Reconciles one pane against one session's event log.
pub struct PaneReconciler {
    pane: PaneId,
    owner: WorktreeId,
    host: Arc<dyn SessionHost>,
    view: SharedView,
    echo: Arc<Mutex<EchoSuppressor>>,
    resume_tx: Option<UnboundedSender<ResumeHandle>>,
    mounted: AtomicBool,
    state: Mutex<SyncState>,
}

impl PaneReconciler {
    pub fn new(
        pane: PaneId,
        owner: WorktreeId,
        host: Arc<dyn SessionHost>,
        view: SharedView,
        echo: Arc<Mutex<EchoSuppressor>>,
        resume_tx: Option<UnboundedSender<ResumeHandle>>,
    ) -> Self {
        Self {
            pane,
            owner,
            host,
            view,
            echo,
            resume_tx,
            mounted: AtomicBool::new(true),
            state: Mutex::new(SyncState {
                last_seen: EventId::UNKNOWN,
                needs_snapshot: true,
                saved_viewport: ViewportRecord::default(),
                rendered_tail: String::new(),
            }),
        }
    }

    pub fn pane(&self) -> PaneId {
        self.pane
    }

    pub fn owner(&self) -> &WorktreeId {
        &self.owner
    }

    pub async fn last_seen(&self) -> EventId {
        self.state.lock().await.last_seen
    }

    pub fn view(&self) -> SharedView {
        SharedView::clone(&self.view)
    }

    /// Forgets everything learned about the previous session's log. Used when
    /// a new session replaces the old one under the same owner: the id
    /// sequence restarts, so the cursor and rendered tail are meaningless.
    pub async fn reset_cursor(&self) {
        let mut state = self.state.lock().await;
        state.last_seen = EventId::UNKNOWN;
        state.needs_snapshot = true;
        state.rendered_tail.clear();
    }

    /// Seeds the viewport restored by the next preserving snapshot, used when
    /// a pane rebinds to a session whose viewport was persisted earlier.
    pub async fn restore_viewport(&self, viewport: ViewportRecord) {
        self.state.lock().await.saved_viewport = viewport;
    }

    /// Reads the live scroll state, for persistence before unmount or rebind.
    pub async fn current_viewport(&self) -> ViewportRecord {
        let mut view = self.view.lock().await;
        ViewportRecord {
            position: view.scroll_position(),
            at_bottom: view.is_scrolled_to_bottom(),
        }
    }

    /// Marks the pane unmounted. Takes effect immediately: in-flight fetches
    /// complete but their results are discarded, and pending hydration stops
    /// at the next chunk boundary.
    pub fn unmount(&self) {
        self.mounted.store(false, Ordering::SeqCst);
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Clear-and-replace resynchronization from a full transcript fetch.
    pub async fn snapshot(&self, preserve_viewport: bool) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        self.snapshot_locked(&mut state, preserve_viewport).await
    }

    /// Incremental catch-up of everything newer than the current cursor.
    pub async fn delta(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        self.delta_locked(&mut state).await
    }

    /// Applies one live-pushed event, repairing any detected gap first.
    pub async fn handle_push(&self, event: &OutputEvent) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        if !self.is_mounted() {
            return Ok(());
        }
        if event.id <= state.last_seen {
            // At-least-once delivery: already applied.
            return Ok(());
        }
        if event.id == state.last_seen.next() {
            self.apply_event(&mut state, event).await;
            return Ok(());
        }

        debug!(
            pane = %self.pane,
            last_seen = %state.last_seen,
            pushed = %event.id,
            "gap detected in push stream, fetching delta"
        );
        self.delta_locked(&mut state).await?;
        if event.id > state.last_seen {
            // The host's delta did not yet cover the pushed event; it is the
            // freshest data we hold, so apply it rather than dropping it.
            self.apply_event(&mut state, event).await;
        }
        Ok(())
    }

    /// Records the viewport and flags the cursor as stale. Conservative:
    /// events may have been missed while hidden even if the push listener
    /// kept running.
    pub async fn on_hidden(&self) {
        let mut state = self.state.lock().await;
        let mut view = self.view.lock().await;
        state.saved_viewport = ViewportRecord {
            position: view.scroll_position(),
            at_bottom: view.is_scrolled_to_bottom(),
        };
        state.needs_snapshot = true;
    }

    /// Brings a revealed pane current: full resync when the cursor went
    /// stale, plus a delta for anything newer than the snapshot's capture id.
    pub async fn on_visible(&self) -> Result<(), SyncError> {
        let mut state = self.state.lock().await;
        if state.needs_snapshot {
            self.snapshot_locked(&mut state, true).await?;
        }
        self.delta_locked(&mut state).await
    }

    async fn snapshot_locked(
        &self,
        state: &mut SyncState,
        preserve_viewport: bool,
    ) -> Result<(), SyncError> {
        if !self.is_mounted() {
            return Ok(());
        }
        let snapshot = self
            .host
            .snapshot(&self.owner, Some(self.pane))
            .await
            .map_err(|source| {
                warn!(pane = %self.pane, owner = %self.owner, "snapshot fetch failed: {source}");
                SyncError::Sync {
                    owner: self.owner.clone(),
                    source,
                }
            })?;
        if !self.is_mounted() {
            return Ok(());
        }

        self.replace_content(state, &snapshot.content).await;
        state.last_seen = snapshot.last_event_id;
        state.needs_snapshot = false;

        let mut view = self.view.lock().await;
        if preserve_viewport && !state.saved_viewport.at_bottom {
            view.scroll_to_line(state.saved_viewport.position);
        } else {
            view.scroll_to_bottom();
        }
        Ok(())
    }

    async fn delta_locked(&self, state: &mut SyncState) -> Result<(), SyncError> {
        if !self.is_mounted() {
            return Ok(());
        }
        let after = state.last_seen;
        let delta = self
            .host
            .delta(&self.owner, after, Some(self.pane))
            .await
            .map_err(|source| {
                warn!(pane = %self.pane, owner = %self.owner, %after, "delta fetch failed: {source}");
                SyncError::Sync {
                    owner: self.owner.clone(),
                    source,
                }
            })?;
        if !self.is_mounted() {
            return Ok(());
        }

        if let Some(content) = delta.snapshot {
            // `after` fell out of the host's retained buffer; the response is
            // a full transcript and replaces everything rendered so far.
            let was_at_bottom = self.view.lock().await.is_scrolled_to_bottom();
            self.replace_content(state, &content).await;
            state.last_seen = delta.last_event_id;
            state.needs_snapshot = false;
            if was_at_bottom {
                self.view.lock().await.scroll_to_bottom();
            }
            return Ok(());
        }

        let mut chunks = delta.chunks;
        chunks.sort_by_key(|event| event.id);
        for event in &chunks {
            if event.id <= state.last_seen {
                // Idempotent replay of already-applied ids.
                continue;
            }
            self.apply_event(state, event).await;
        }
        // The host may report a newer capture id than any chunk in this
        // pane's unseen range (e.g. everything newer was pane-addressed
        // elsewhere); the cursor still advances.
        if delta.last_event_id > state.last_seen {
            state.last_seen = delta.last_event_id;
        }
        Ok(())
    }

    /// Writes one event through the dedup pipeline and advances the cursor.
    /// The cursor advances even for events addressed to another pane, which
    /// occupy ids in the same per-session log but must not render here.
    async fn apply_event(&self, state: &mut SyncState, event: &OutputEvent) {
        state.last_seen = event.id;
        if let Some(target) = event.pane_id
            && target != self.pane
        {
            return;
        }

        let data = self.echo.lock().await.consume(self.pane, &event.data);
        if data.is_empty() {
            return;
        }
        self.scan_for_resume(&data);

        let trim = overlap(&state.rendered_tail, &data);
        let remainder = &data[trim..];
        if remainder.is_empty() {
            return;
        }
        self.view.lock().await.write(remainder);
        Self::push_tail(state, remainder);
    }

    async fn replace_content(&self, state: &mut SyncState, content: &str) {
        self.scan_for_resume(content);
        {
            let mut view = self.view.lock().await;
            view.clear();
        }
        let mut rest = content;
        while !rest.is_empty() {
            if !self.is_mounted() {
                // Unmounted mid-hydration: abandon the remaining chunks.
                return;
            }
            let take = chunk_len(rest, HYDRATION_CHUNK_BYTES);
            let (chunk, tail) = rest.split_at(take);
            self.view.lock().await.write(chunk);
            rest = tail;
            if !rest.is_empty() {
                yield_now().await;
            }
        }
        state.rendered_tail.clear();
        Self::push_tail(state, content);
    }

    fn scan_for_resume(&self, data: &str) {
        if let Some(tx) = &self.resume_tx
            && let Some(handle) = extract_resume_command(data)
        {
            let _ = tx.send(handle);
        }
    }

    fn push_tail(state: &mut SyncState, rendered: &str) {
        state.rendered_tail.push_str(rendered);
        if state.rendered_tail.len() > RENDER_TAIL_MAX_BYTES {
            let cut = state.rendered_tail.len() - RENDER_TAIL_MAX_BYTES;
            let cut = ceil_char_boundary(&state.rendered_tail, cut);
            state.rendered_tail.drain(..cut);
        }
    }
}

fn chunk_len(s: &str, max: usize) -> usize {
    if s.len() <= max {
        s.len()
    } else {
        floor_char_boundary(s, max)
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
