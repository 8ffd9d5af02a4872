//! The host-facing boundary of the synchronization core.
//!
//! The host is the process that owns the PTYs and the per-session append-only
//! output log. The core never spawns processes itself; everything it needs
//! from the host is expressed by the [`SessionHost`] trait so tests can drive
//! the state machines with a scripted implementation.

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

/// Parameters of a start request.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Shell command to launch, typically a resume command recovered from a
    /// prior session. `None` asks the host for its default shell.
    pub startup_command: Option<String>,
    /// Subscriber the start was issued on behalf of, when the host routes
    /// per-pane streams.
    pub pane_id: Option<PaneId>,
}

/// One message on the host's push channel.
///
/// Delivery is at-least-once and may be lossy; the monotonic event ids let the
/// reconciler detect and repair loss, so the transport needs no stronger
/// guarantee.
#[derive(Debug, Clone)]
pub enum HostEvent {
    Output {
        owner: WorktreeId,
        session_id: SessionId,
        event: OutputEvent,
    },
    Exit {
        owner: WorktreeId,
        session_id: SessionId,
        notice: ExitNotice,
    },
}

/// Operations the core consumes from the session host.
///
/// At most one session runs per owner (worktree); a new start under the same
/// owner replaces the previous session.
#[async_trait]
pub trait SessionHost: Send + Sync {
    async fn start_session(
        &self,
        owner: &WorktreeId,
        options: StartOptions,
    ) -> Result<SessionInfo, HostError>;

    async fn stop_session(&self, owner: &WorktreeId, pane_id: Option<PaneId>)
    -> Result<(), HostError>;

    async fn send_input(
        &self,
        owner: &WorktreeId,
        data: &[u8],
        pane_id: Option<PaneId>,
    ) -> Result<(), HostError>;

    async fn resize(
        &self,
        owner: &WorktreeId,
        cols: u16,
        rows: u16,
        pane_id: Option<PaneId>,
    ) -> Result<(), HostError>;

    /// Full current transcript plus the event id as of capture.
    async fn snapshot(
        &self,
        owner: &WorktreeId,
        pane_id: Option<PaneId>,
    ) -> Result<TranscriptSnapshot, HostError>;

    /// Events after `after`, or a fallback snapshot when `after` has fallen
    /// out of the host's retained buffer.
    async fn delta(
        &self,
        owner: &WorktreeId,
        after: EventId,
        pane_id: Option<PaneId>,
    ) -> Result<TranscriptDelta, HostError>;

    /// Durably records the resume command for `owner`; `None` clears it.
    async fn set_resume_command(
        &self,
        owner: &WorktreeId,
        command: Option<&str>,
    ) -> Result<(), HostError>;

    /// Returns the host's current notion of the resume command.
    async fn refresh_resume_command(&self, owner: &WorktreeId)
    -> Result<Option<String>, HostError>;

    /// Asks the host to rebuild the resume command from its durable session
    /// logs, used after an abnormal exit invalidated the cached one.
    async fn refresh_resume_from_logs(&self, owner: &WorktreeId) -> Result<(), HostError>;

    /// Subscribes to the push channel. Dropping the receiver is the
    /// unsubscribe.
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;
}
