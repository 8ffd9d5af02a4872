//! Cross-component scenarios: a pane mounting against a live session,
//! gap repair under concurrent triggers, multi-pane independence, and the
//! long-run notification pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use panesync_core::busy::BUSY_TICK_MS;
use panesync_core::busy::BusyTracker;
use panesync_core::busy::SessionActivity;
use panesync_core::echo::EchoSuppressor;
use panesync_core::host::HostEvent;
use panesync_core::host::SessionHost;
use panesync_core::pane::PaneController;
use panesync_core::pane::PaneStatus;
use panesync_core::persist::SyncStore;
use panesync_core::reconciler::PaneReconciler;
use panesync_core::testing::RecordingView;
use panesync_core::testing::ScriptedHost;
use panesync_protocol::EventId;
use panesync_protocol::OutputEvent;
use panesync_protocol::PaneId;
use panesync_protocol::TranscriptDelta;
use panesync_protocol::TranscriptSnapshot;
use panesync_protocol::WorktreeId;
use pretty_assertions::assert_eq;
use tokio::sync::Mutex;
use tokio::sync::mpsc::unbounded_channel;

fn owner() -> WorktreeId {
    WorktreeId::new("w1")
}

fn reconciler_for(host: &Arc<ScriptedHost>, view: &RecordingView) -> PaneReconciler {
    PaneReconciler::new(
        PaneId::new(),
        owner(),
        Arc::clone(host) as Arc<dyn SessionHost>,
        view.shared(),
        Arc::new(Mutex::new(EchoSuppressor::new())),
        None,
    )
}

/// A pane mounts with an unknown cursor, catches up from a snapshot, applies
/// one live push directly, and heals a gap through a delta, ending with the
/// concatenated transcript and no duplication.
#[tokio::test]
async fn mount_live_push_and_gap_repair_end_to_end() {
    let host = Arc::new(ScriptedHost::new());
    host.set_snapshot(TranscriptSnapshot {
        content: "$ ".to_string(),
        last_event_id: EventId(42),
    });

    let (notices, _notices_rx) = unbounded_channel();
    let controller = PaneController::new(
        PaneId::new(),
        owner(),
        Arc::clone(&host) as Arc<dyn SessionHost>,
        SyncStore::in_memory(),
        notices,
    );
    let view = RecordingView::new();
    controller.attach_view(view.shared()).await;
    controller.set_visible(true).await.expect("reveal");

    assert_eq!(controller.status().await, PaneStatus::Running);
    assert_eq!(view.content(), "$ ");
    let session = controller.session().await.expect("session");
    let sync = controller.reconciler().await.expect("reconciler");
    assert_eq!(sync.last_seen().await, EventId(42));

    // Contiguous push applies directly.
    controller
        .handle_host_event(&HostEvent::Output {
            owner: owner(),
            session_id: session.session_id.clone(),
            event: OutputEvent::broadcast(EventId(43), "ls\n"),
        })
        .await
        .expect("push 43");
    assert_eq!(sync.last_seen().await, EventId(43));

    // A push at id 50 exposes a gap; the delta from 43 returns 44..=50.
    host.push_delta(TranscriptDelta {
        chunks: (44..=50)
            .map(|id| OutputEvent::broadcast(EventId(id), format!("c{id}.")))
            .collect(),
        last_event_id: EventId(50),
        snapshot: None,
    });
    controller
        .handle_host_event(&HostEvent::Output {
            owner: owner(),
            session_id: session.session_id.clone(),
            event: OutputEvent::broadcast(EventId(50), "c50."),
        })
        .await
        .expect("push 50");

    assert_eq!(sync.last_seen().await, EventId(50));
    assert_eq!(
        view.content(),
        "$ ls\nc44.c45.c46.c47.c48.c49.c50.",
        "snapshot and chunks concatenated exactly once"
    );
    // Initial catch-up delta at 42, then exactly one gap fill from 43.
    assert_eq!(host.delta_calls(), vec![EventId(42), EventId(43)]);
}

/// Two pushes that each expose a gap race each other; the per-pane FIFO
/// queue chains the second behind the first, so only one delta is issued and
/// writes land in id order.
#[tokio::test]
async fn concurrent_gap_fills_are_chained_not_raced() {
    let host = Arc::new(ScriptedHost::new());
    host.set_snapshot(TranscriptSnapshot {
        content: String::new(),
        last_event_id: EventId(0),
    });
    host.delta_from_log(
        (1..=5)
            .map(|id| OutputEvent::broadcast(EventId(id), format!("e{id}.")))
            .collect(),
    );
    // The first gap fill stalls long enough for the second trigger to queue.
    host.push_delta_delay(25);

    let view = RecordingView::new();
    let sync = Arc::new(reconciler_for(&host, &view));
    sync.snapshot(false).await.expect("snapshot");

    let first = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move {
            sync.handle_push(&OutputEvent::broadcast(EventId(3), "e3."))
                .await
        }
    });
    let second = tokio::spawn({
        let sync = Arc::clone(&sync);
        async move {
            sync.handle_push(&OutputEvent::broadcast(EventId(5), "e5."))
                .await
        }
    });
    first.await.expect("join").expect("push 3");
    second.await.expect("join").expect("push 5");

    assert_eq!(view.content(), "e1.e2.e3.e4.e5.", "in id order, once each");
    assert_eq!(sync.last_seen().await, EventId(5));
    assert_eq!(
        host.delta_calls(),
        vec![EventId(0)],
        "the queued trigger found the log already healed"
    );
}

/// Panes on the same session keep independent cursors: one hidden pane
/// missing events re-syncs on reveal without disturbing the pane that stayed
/// current.
#[tokio::test]
async fn panes_on_one_session_reconcile_independently() {
    let host = Arc::new(ScriptedHost::new());
    host.set_snapshot(TranscriptSnapshot {
        content: "$ ".to_string(),
        last_event_id: EventId(0),
    });

    let view_a = RecordingView::new();
    let view_b = RecordingView::new();
    let pane_a = reconciler_for(&host, &view_a);
    let pane_b = reconciler_for(&host, &view_b);
    pane_a.snapshot(false).await.expect("snapshot a");
    pane_b.snapshot(false).await.expect("snapshot b");

    for (id, data) in [(1, "a"), (2, "b")] {
        let event = OutputEvent::broadcast(EventId(id), data);
        pane_a.handle_push(&event).await.expect("push a");
        pane_b.handle_push(&event).await.expect("push b");
    }

    // Pane A hides and misses event 3; pane B applies it live.
    pane_a.on_hidden().await;
    pane_b
        .handle_push(&OutputEvent::broadcast(EventId(3), "c"))
        .await
        .expect("push b");

    host.set_snapshot(TranscriptSnapshot {
        content: "$ abc".to_string(),
        last_event_id: EventId(3),
    });
    pane_a.on_visible().await.expect("reveal a");

    assert_eq!(view_a.content(), "$ abc");
    assert_eq!(view_b.content(), "$ abc");
    assert_eq!(pane_a.last_seen().await, EventId(3));
    assert_eq!(pane_b.last_seen().await, EventId(3));
}

/// Output ticks drive the busy signal; a busy period crossing the threshold
/// fires exactly one notification when the session goes idle.
#[test]
fn long_running_command_notifies_once() {
    let session = owner();
    let mut activity = SessionActivity::default();
    let mut tracker = BusyTracker::new();

    let mut fired = Vec::new();
    let mut now = 0u64;
    while now <= 16_000 {
        // The command streams output from 1s to 12s, then goes quiet.
        if (1_000..=12_000).contains(&now) {
            activity.note_output(now);
        }
        if tracker.update(&session, activity.is_busy(now), now) {
            fired.push(now);
        }
        now += BUSY_TICK_MS;
    }

    assert_eq!(fired.len(), 1, "one notification for one long busy period");
    assert!(fired[0] > 12_000, "fires after the session went idle");

    // Pruning unrelated ids leaves the notified state alone; pruning the
    // session itself re-arms it.
    let mut valid = HashSet::new();
    valid.insert(session.clone());
    tracker.prune(&valid);
    assert_eq!(tracker.tracked(), 1);
    tracker.prune(&HashSet::new());
    assert_eq!(tracker.tracked(), 0);
}
