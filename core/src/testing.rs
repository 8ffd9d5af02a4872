//! Scripted collaborators for exercising the sync state machines without a
//! real PTY host or renderer. Used by this crate's unit tests and the
//! integration suite under `tests/`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_trait::async_trait;
use panesync_protocol::EventId;
use panesync_protocol::ExitNotice;
use panesync_protocol::OutputEvent;
use panesync_protocol::PaneId;
use panesync_protocol::SessionId;
use panesync_protocol::SessionInfo;
use panesync_protocol::TranscriptDelta;
use panesync_protocol::TranscriptSnapshot;
use panesync_protocol::WorktreeId;
use tokio::sync::broadcast;

use crate::errors::HostError;
use crate::host::HostEvent;
use crate::host::SessionHost;
use crate::host::StartOptions;
use crate::view::SharedView;
use crate::view::TerminalView;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct HostScript {
    snapshot: Option<TranscriptSnapshot>,
    scripted_deltas: VecDeque<TranscriptDelta>,
    log: Vec<OutputEvent>,
    fail_next_delta: Option<String>,
    delta_delays_ms: VecDeque<u64>,
    fail_next_start: Option<String>,
    delta_calls: Vec<EventId>,
    snapshot_calls: usize,
    start_calls: Vec<StartOptions>,
    inputs: Vec<Vec<u8>>,
    resume_command: Option<String>,
    log_resume_command: Option<String>,
    refresh_from_logs_calls: usize,
    next_pid: u32,
}

/// Host double whose snapshot/delta/start responses are scripted per test.
///
/// Delta resolution order: a scripted failure, then an explicitly queued
/// response, then a computation over the scripted event log, and finally an
/// empty delta acknowledging the requested cursor.
pub struct ScriptedHost {
    script: Mutex<HostScript>,
    events: broadcast::Sender<HostEvent>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            script: Mutex::new(HostScript {
                next_pid: 4242,
                ..HostScript::default()
            }),
            events,
        }
    }

    pub fn set_snapshot(&self, snapshot: TranscriptSnapshot) {
        lock(&self.script).snapshot = Some(snapshot);
    }

    pub fn push_delta(&self, delta: TranscriptDelta) {
        lock(&self.script).scripted_deltas.push_back(delta);
    }

    /// Seeds an event log from which deltas are answered dynamically.
    pub fn delta_from_log(&self, events: Vec<OutputEvent>) {
        lock(&self.script).log = events;
    }

    pub fn fail_next_delta(&self, message: &str) {
        lock(&self.script).fail_next_delta = Some(message.to_string());
    }

    /// Makes the next delta call answer only after the given pause, to
    /// simulate a slow host while other sync triggers pile up.
    pub fn push_delta_delay(&self, delay_ms: u64) {
        lock(&self.script).delta_delays_ms.push_back(delay_ms);
    }

    pub fn fail_next_start(&self, message: &str) {
        lock(&self.script).fail_next_start = Some(message.to_string());
    }

    pub fn delta_calls(&self) -> Vec<EventId> {
        lock(&self.script).delta_calls.clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        lock(&self.script).snapshot_calls
    }

    pub fn start_calls(&self) -> Vec<StartOptions> {
        lock(&self.script).start_calls.clone()
    }

    pub fn inputs(&self) -> Vec<Vec<u8>> {
        lock(&self.script).inputs.clone()
    }

    pub fn resume_command(&self) -> Option<String> {
        lock(&self.script).resume_command.clone()
    }

    /// What `refresh_resume_from_logs` will restore the resume command to.
    pub fn set_log_resume_command(&self, command: Option<&str>) {
        lock(&self.script).log_resume_command = command.map(str::to_string);
    }

    pub fn refresh_from_logs_calls(&self) -> usize {
        lock(&self.script).refresh_from_logs_calls
    }

    pub fn emit_output(&self, owner: &WorktreeId, session_id: &SessionId, event: OutputEvent) {
        let _ = self.events.send(HostEvent::Output {
            owner: owner.clone(),
            session_id: session_id.clone(),
            event,
        });
    }

    pub fn emit_exit(&self, owner: &WorktreeId, session_id: &SessionId, notice: ExitNotice) {
        let _ = self.events.send(HostEvent::Exit {
            owner: owner.clone(),
            session_id: session_id.clone(),
            notice,
        });
    }
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionHost for ScriptedHost {
    async fn start_session(
        &self,
        owner: &WorktreeId,
        options: StartOptions,
    ) -> Result<SessionInfo, HostError> {
        let mut script = lock(&self.script);
        script.start_calls.push(options);
        if let Some(message) = script.fail_next_start.take() {
            return Err(HostError::new(message));
        }
        let pid = script.next_pid;
        script.next_pid += 1;
        Ok(SessionInfo {
            session_id: SessionId::new(format!("{owner}-session-{pid}")),
            pid,
        })
    }

    async fn stop_session(
        &self,
        _owner: &WorktreeId,
        _pane_id: Option<PaneId>,
    ) -> Result<(), HostError> {
        Ok(())
    }

    async fn send_input(
        &self,
        _owner: &WorktreeId,
        data: &[u8],
        _pane_id: Option<PaneId>,
    ) -> Result<(), HostError> {
        lock(&self.script).inputs.push(data.to_vec());
        Ok(())
    }

    async fn resize(
        &self,
        _owner: &WorktreeId,
        _cols: u16,
        _rows: u16,
        _pane_id: Option<PaneId>,
    ) -> Result<(), HostError> {
        Ok(())
    }

    async fn snapshot(
        &self,
        _owner: &WorktreeId,
        _pane_id: Option<PaneId>,
    ) -> Result<TranscriptSnapshot, HostError> {
        let mut script = lock(&self.script);
        script.snapshot_calls += 1;
        script
            .snapshot
            .clone()
            .ok_or_else(|| HostError::new("no snapshot scripted"))
    }

    async fn delta(
        &self,
        _owner: &WorktreeId,
        after: EventId,
        _pane_id: Option<PaneId>,
    ) -> Result<TranscriptDelta, HostError> {
        let delay_ms = {
            let mut script = lock(&self.script);
            script.delta_calls.push(after);
            script.delta_delays_ms.pop_front()
        };
        if let Some(delay_ms) = delay_ms {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        let mut script = lock(&self.script);
        if let Some(message) = script.fail_next_delta.take() {
            return Err(HostError::new(message));
        }
        if let Some(delta) = script.scripted_deltas.pop_front() {
            return Ok(delta);
        }
        if !script.log.is_empty() {
            let chunks: Vec<OutputEvent> = script
                .log
                .iter()
                .filter(|event| event.id > after)
                .cloned()
                .collect();
            let last_event_id = script
                .log
                .iter()
                .map(|event| event.id)
                .max()
                .unwrap_or(after);
            return Ok(TranscriptDelta {
                chunks,
                last_event_id,
                snapshot: None,
            });
        }
        Ok(TranscriptDelta {
            chunks: Vec::new(),
            last_event_id: after,
            snapshot: None,
        })
    }

    async fn set_resume_command(
        &self,
        _owner: &WorktreeId,
        command: Option<&str>,
    ) -> Result<(), HostError> {
        lock(&self.script).resume_command = command.map(str::to_string);
        Ok(())
    }

    async fn refresh_resume_command(
        &self,
        _owner: &WorktreeId,
    ) -> Result<Option<String>, HostError> {
        Ok(lock(&self.script).resume_command.clone())
    }

    async fn refresh_resume_from_logs(&self, _owner: &WorktreeId) -> Result<(), HostError> {
        let mut script = lock(&self.script);
        script.refresh_from_logs_calls += 1;
        script.resume_command = script.log_resume_command.clone();
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

#[derive(Debug, Default)]
struct ViewLog {
    content: String,
    writes: Vec<String>,
    clear_count: usize,
    scroll_position: i64,
    at_bottom: bool,
    scroll_to_line_calls: Vec<i64>,
    scroll_to_bottom_calls: usize,
    focus_count: usize,
    input_disabled: Option<bool>,
}

/// Terminal view that records every operation for assertions.
#[derive(Clone)]
pub struct RecordingView {
    log: Arc<Mutex<ViewLog>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(ViewLog {
                at_bottom: true,
                ..ViewLog::default()
            })),
        }
    }

    /// A [`SharedView`] handle writing into the same log as `self`.
    pub fn shared(&self) -> SharedView {
        crate::view::shared_view(self.clone())
    }

    pub fn content(&self) -> String {
        lock(&self.log).content.clone()
    }

    pub fn writes(&self) -> Vec<String> {
        lock(&self.log).writes.clone()
    }

    pub fn write_count(&self) -> usize {
        lock(&self.log).writes.len()
    }

    pub fn clear_count(&self) -> usize {
        lock(&self.log).clear_count
    }

    /// Simulates the user scrolling the widget.
    pub fn set_scroll(&self, position: i64, at_bottom: bool) {
        let mut log = lock(&self.log);
        log.scroll_position = position;
        log.at_bottom = at_bottom;
    }

    pub fn last_scroll_to_line(&self) -> Option<i64> {
        lock(&self.log).scroll_to_line_calls.last().copied()
    }

    pub fn scroll_to_bottom_calls(&self) -> usize {
        lock(&self.log).scroll_to_bottom_calls
    }

    pub fn focus_count(&self) -> usize {
        lock(&self.log).focus_count
    }

    pub fn input_disabled(&self) -> Option<bool> {
        lock(&self.log).input_disabled
    }
}

impl Default for RecordingView {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalView for RecordingView {
    fn write(&mut self, data: &str) {
        let mut log = lock(&self.log);
        log.content.push_str(data);
        log.writes.push(data.to_string());
    }

    fn clear(&mut self) {
        let mut log = lock(&self.log);
        log.content.clear();
        log.writes.clear();
        log.clear_count += 1;
    }

    fn focus(&mut self) {
        lock(&self.log).focus_count += 1;
    }

    fn set_input_disabled(&mut self, disabled: bool) {
        lock(&self.log).input_disabled = Some(disabled);
    }

    fn scroll_position(&mut self) -> i64 {
        lock(&self.log).scroll_position
    }

    fn scroll_to_line(&mut self, line: i64) {
        let mut log = lock(&self.log);
        log.scroll_position = line;
        log.at_bottom = false;
        log.scroll_to_line_calls.push(line);
    }

    fn scroll_to_bottom(&mut self) {
        let mut log = lock(&self.log);
        log.at_bottom = true;
        log.scroll_to_bottom_calls += 1;
    }

    fn is_scrolled_to_bottom(&mut self) -> bool {
        lock(&self.log).at_bottom
    }
}
