//! Shared types for the pane/session output synchronization protocol.
//!
//! These are the records exchanged between a session host (the process that
//! owns the PTYs and the append-only output log) and any number of UI panes
//! reconciling against that log. Everything here is plain data; the state
//! machines that interpret it live in `panesync-core`.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Monotonically increasing id of one appended output record. Ids are
/// strictly increasing per session and never reused, so a consumer that has
/// seen id `N` may safely ignore any event with `id <= N`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventId(pub u64);

impl EventId {
    /// Cursor value meaning "no event seen yet".
    pub const UNKNOWN: EventId = EventId(0);

    pub fn next(self) -> EventId {
        EventId(self.0 + 1)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned identifier of a running session. Opaque to the UI side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Logical owner of a session. At most one session runs per worktree; a new
/// session replaces the old one under the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorktreeId(pub String);

impl WorktreeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for WorktreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// UI-side identifier of one subscriber to a session's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneId(pub Uuid);

impl PaneId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaneId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One immutable, host-appended output record.
///
/// `pane_id` is present only when the host was asked to address a specific
/// subscriber; `None` means "broadcast on the session's default stream".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputEvent {
    pub id: EventId,
    pub data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_id: Option<PaneId>,
}

impl OutputEvent {
    pub fn broadcast(id: EventId, data: impl Into<String>) -> Self {
        Self {
            id,
            data: data.into(),
            pane_id: None,
        }
    }
}

/// Full current transcript plus the event id as of capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSnapshot {
    pub content: String,
    pub last_event_id: EventId,
}

/// Incremental events after a requested id.
///
/// When the requested id has fallen out of the host's retained buffer the
/// host answers with `snapshot: Some(..)` instead of chunks; the caller must
/// clear-and-replace exactly as for a snapshot response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptDelta {
    pub chunks: Vec<OutputEvent>,
    pub last_event_id: EventId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Exited,
}

/// Successful response to a start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub pid: u32,
}

/// Host-reported session termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitNotice {
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
}

impl ExitNotice {
    /// Non-zero exit code or any terminating signal counts as abnormal and
    /// invalidates the persisted resume handle.
    pub fn is_abnormal(&self) -> bool {
        self.signal.is_some() || self.exit_code.is_some_and(|code| code != 0)
    }
}

/// An opaque handle allowing a new session to continue a prior one's context,
/// recovered from a host-emitted announcement in the output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeHandle {
    pub raw_command: String,
    pub session_identifier: String,
}

/// Persisted per-worktree viewport, restored when a hidden or rebound pane
/// re-attaches to the session's transcript.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportRecord {
    pub position: i64,
    pub at_bottom: bool,
}

impl Default for ViewportRecord {
    fn default() -> Self {
        Self {
            position: 0,
            at_bottom: true,
        }
    }
}
