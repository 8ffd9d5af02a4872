//! Per-pane session lifecycle.
//!
//! A pane moves through `idle -> starting -> running -> exited`, with
//! `exited -> starting` as the recovery edge. The controller owns start/stop
//! requests, visibility-driven hydration, viewport persistence across
//! hide/show and worktree switches, input gating, and the resume-handle
//! persistence policy. Concurrent start requests coalesce onto a single
//! in-flight future, and a throttle keeps a consistently failing host from
//! being hammered in a loop.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared;
use panesync_protocol::ExitNotice;
use panesync_protocol::PaneId;
use panesync_protocol::ResumeHandle;
use panesync_protocol::SessionId;
use panesync_protocol::SessionInfo;
use panesync_protocol::WorktreeId;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::echo::EchoSuppressor;
use crate::errors::SyncError;
use crate::host::HostEvent;
use crate::host::SessionHost;
use crate::host::StartOptions;
use crate::persist::SyncStore;
use crate::reconciler::PaneReconciler;
use crate::resume::resume_command_for;
use crate::view::SharedView;

/// Minimum spacing between start attempts after a failure.
pub const START_THROTTLE_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneStatus {
    Idle,
    Starting,
    Running,
    Exited,
}

impl fmt::Display for PaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaneStatus::Idle => f.write_str("idle"),
            PaneStatus::Starting => f.write_str("starting"),
            PaneStatus::Running => f.write_str("running"),
            PaneStatus::Exited => f.write_str("exited"),
        }
    }
}

/// User-visible notifications emitted on the controller's side channel. Each
/// is paired with a tracing diagnostic at the point of origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserNotice {
    StartFailed { owner: WorktreeId, message: String },
    InputRejected { owner: WorktreeId },
    SessionEnded { owner: WorktreeId, notice: ExitNotice },
}

impl fmt::Display for UserNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserNotice::StartFailed { owner, message } => {
                write!(f, "failed to start session for {owner}: {message}")
            }
            UserNotice::InputRejected { owner } => {
                write!(f, "no running session for {owner}; input was dropped")
            }
            UserNotice::SessionEnded { owner, notice } => match (&notice.signal, notice.exit_code)
            {
                (Some(signal), _) => write!(f, "session for {owner} killed by {signal}"),
                (None, Some(code)) if code != 0 => {
                    write!(f, "session for {owner} exited with code {code}")
                }
                _ => write!(f, "session for {owner} ended"),
            },
        }
    }
}

type SharedStart = Shared<BoxFuture<'static, Result<SessionInfo, String>>>;

struct PaneRuntime {
    owner: WorktreeId,
    root_alias: Option<WorktreeId>,
    status: PaneStatus,
    session: Option<SessionInfo>,
    visible: bool,
    active: bool,
    last_exit: Option<ExitNotice>,
    resume_identifier: Option<String>,
    throttle_until: Option<Instant>,
    start_in_flight: Option<SharedStart>,
    reconciler: Option<Arc<PaneReconciler>>,
}

/// Lifecycle state machine of one pane.
pub struct PaneController {
    pane: PaneId,
    host: Arc<dyn SessionHost>,
    echo: Arc<Mutex<EchoSuppressor>>,
    store: Mutex<SyncStore>,
    notices: UnboundedSender<UserNotice>,
    resume_tx: UnboundedSender<ResumeHandle>,
    resume_rx: Mutex<UnboundedReceiver<ResumeHandle>>,
    runtime: Mutex<PaneRuntime>,
}

impl PaneController {
    pub fn new(
        pane: PaneId,
        owner: WorktreeId,
        host: Arc<dyn SessionHost>,
        store: SyncStore,
        notices: UnboundedSender<UserNotice>,
    ) -> Self {
        let (resume_tx, resume_rx) = unbounded_channel();
        Self {
            pane,
            host,
            echo: Arc::new(Mutex::new(EchoSuppressor::new())),
            store: Mutex::new(store),
            notices,
            resume_tx,
            resume_rx: Mutex::new(resume_rx),
            runtime: Mutex::new(PaneRuntime {
                owner,
                root_alias: None,
                status: PaneStatus::Idle,
                session: None,
                visible: false,
                active: false,
                last_exit: None,
                resume_identifier: None,
                throttle_until: None,
                start_in_flight: None,
                reconciler: None,
            }),
        }
    }

    pub fn pane(&self) -> PaneId {
        self.pane
    }

    pub async fn status(&self) -> PaneStatus {
        self.runtime.lock().await.status
    }

    pub async fn session(&self) -> Option<SessionInfo> {
        self.runtime.lock().await.session.clone()
    }

    pub async fn last_exit(&self) -> Option<ExitNotice> {
        self.runtime.lock().await.last_exit.clone()
    }

    pub async fn reconciler(&self) -> Option<Arc<PaneReconciler>> {
        self.runtime.lock().await.reconciler.clone()
    }

    /// Explicit resume identifier to prefer over the persisted handle on the
    /// next start.
    pub async fn set_resume_identifier(&self, identifier: Option<String>) {
        self.runtime.lock().await.resume_identifier = identifier;
    }

    /// When set, resume-command writes are mirrored under this alias as well
    /// (the worktree is a root checkout with a stable key).
    pub async fn set_root_alias(&self, alias: Option<WorktreeId>) {
        self.runtime.lock().await.root_alias = alias;
    }

    /// Binds the terminal view and builds the reconciler for the current
    /// owner, seeding it with the persisted viewport.
    pub async fn attach_view(&self, view: SharedView) {
        let owner = self.runtime.lock().await.owner.clone();
        let sync = Arc::new(PaneReconciler::new(
            self.pane,
            owner.clone(),
            Arc::clone(&self.host),
            view,
            Arc::clone(&self.echo),
            Some(self.resume_tx.clone()),
        ));
        let viewport = self
            .store
            .lock()
            .await
            .load_viewport(&owner)
            .unwrap_or_default();
        sync.restore_viewport(viewport).await;
        self.runtime.lock().await.reconciler = Some(sync);
    }

    /// Starts a session if none is running. Callers racing each other share
    /// one in-flight start; a recent failure suppresses new attempts for
    /// [`START_THROTTLE_MS`].
    pub async fn request_start(&self) -> Result<(), SyncError> {
        enum Plan {
            Noop,
            Join(SharedStart),
            Lead {
                tx: tokio::sync::oneshot::Sender<Result<SessionInfo, String>>,
                owner: WorktreeId,
                options: StartOptions,
            },
        }

        let plan = {
            let mut rt = self.runtime.lock().await;
            if rt.status == PaneStatus::Running {
                Plan::Noop
            } else if let Some(shared) = rt.start_in_flight.clone() {
                Plan::Join(shared)
            } else if rt
                .throttle_until
                .is_some_and(|until| Instant::now() < until)
            {
                debug!(pane = %self.pane, owner = %rt.owner, "start suppressed by throttle");
                Plan::Noop
            } else {
                let startup_command = self.startup_command(&rt).await;
                rt.status = PaneStatus::Starting;
                let (tx, rx) = tokio::sync::oneshot::channel();
                let shared: SharedStart = async move {
                    rx.await
                        .unwrap_or_else(|_| Err("start request dropped".to_string()))
                }
                .boxed()
                .shared();
                rt.start_in_flight = Some(shared);
                Plan::Lead {
                    tx,
                    owner: rt.owner.clone(),
                    options: StartOptions {
                        startup_command,
                        pane_id: Some(self.pane),
                    },
                }
            }
        };

        match plan {
            Plan::Noop => Ok(()),
            Plan::Join(shared) => match shared.await {
                Ok(_) => Ok(()),
                Err(message) => {
                    let owner = self.runtime.lock().await.owner.clone();
                    Err(SyncError::StartFailure {
                        owner,
                        source: crate::errors::HostError::new(message),
                    })
                }
            },
            Plan::Lead { tx, owner, options } => {
                self.lead_start(tx, owner, options).await
            }
        }
    }

    async fn lead_start(
        &self,
        tx: tokio::sync::oneshot::Sender<Result<SessionInfo, String>>,
        owner: WorktreeId,
        options: StartOptions,
    ) -> Result<(), SyncError> {
        match self.host.start_session(&owner, options).await {
            Ok(info) => {
                let (reconciler, visible, active) = {
                    let mut rt = self.runtime.lock().await;
                    rt.start_in_flight = None;
                    rt.status = PaneStatus::Running;
                    rt.session = Some(info.clone());
                    rt.last_exit = None;
                    rt.throttle_until = None;
                    (rt.reconciler.clone(), rt.visible, rt.active)
                };
                let _ = tx.send(Ok(info));
                if let Some(sync) = &reconciler {
                    // Fresh session, fresh id sequence: full hydration. The
                    // start itself already succeeded; a failed first sync is
                    // retried on the next trigger like any other.
                    sync.reset_cursor().await;
                    if visible && let Err(err) = sync.on_visible().await {
                        warn!(pane = %self.pane, "initial hydration failed: {err}");
                    }
                }
                self.sync_input_state().await;
                if visible && active && let Some(sync) = &reconciler {
                    sync.view().lock().await.focus();
                }
                Ok(())
            }
            Err(err) => {
                {
                    let mut rt = self.runtime.lock().await;
                    rt.start_in_flight = None;
                    rt.status = PaneStatus::Idle;
                    rt.throttle_until =
                        Some(Instant::now() + Duration::from_millis(START_THROTTLE_MS));
                }
                error!(pane = %self.pane, %owner, "session start failed: {err}");
                let _ = tx.send(Err(err.to_string()));
                self.notify(UserNotice::StartFailed {
                    owner: owner.clone(),
                    message: err.to_string(),
                });
                Err(SyncError::StartFailure { owner, source: err })
            }
        }
    }

    /// Startup command precedence: explicit resume identifier, then the last
    /// persisted resume handle, then the host's bare default.
    async fn startup_command(&self, rt: &PaneRuntime) -> Option<String> {
        if let Some(identifier) = &rt.resume_identifier {
            return Some(resume_command_for(identifier));
        }
        self.store.lock().await.last_resume_command(&rt.owner)
    }

    pub async fn stop(&self) -> Result<(), SyncError> {
        let owner = self.runtime.lock().await.owner.clone();
        self.host
            .stop_session(&owner, Some(self.pane))
            .await
            .map_err(|source| {
                warn!(pane = %self.pane, %owner, "stop request failed: {source}");
                SyncError::Sync {
                    owner: owner.clone(),
                    source,
                }
            })
    }

    /// Visibility transitions drive hydration: hiding records the viewport
    /// and stales the cursor; revealing re-syncs and, when nothing is
    /// running, triggers a start.
    pub async fn set_visible(&self, visible: bool) -> Result<(), SyncError> {
        let (status, reconciler, owner, active) = {
            let mut rt = self.runtime.lock().await;
            rt.visible = visible;
            (
                rt.status,
                rt.reconciler.clone(),
                rt.owner.clone(),
                rt.active,
            )
        };

        if !visible {
            if let Some(sync) = &reconciler {
                let viewport = sync.current_viewport().await;
                sync.on_hidden().await;
                self.store.lock().await.save_viewport(&owner, viewport);
            }
            self.sync_input_state().await;
            return Ok(());
        }

        match status {
            PaneStatus::Running => {
                if let Some(sync) = &reconciler {
                    sync.on_visible().await?;
                    if active {
                        sync.view().lock().await.focus();
                    }
                }
                self.sync_input_state().await;
                Ok(())
            }
            PaneStatus::Idle | PaneStatus::Exited => self.request_start().await,
            PaneStatus::Starting => Ok(()),
        }
    }

    pub async fn set_active(&self, active: bool) -> Result<(), SyncError> {
        let (reconciler, focus) = {
            let mut rt = self.runtime.lock().await;
            rt.active = active;
            (
                rt.reconciler.clone(),
                active && rt.visible && rt.status == PaneStatus::Running,
            )
        };
        self.sync_input_state().await;
        if focus && let Some(sync) = &reconciler {
            sync.view().lock().await.focus();
        }
        Ok(())
    }

    /// Input is enabled iff the session is running and the pane is both
    /// active and visible.
    async fn sync_input_state(&self) {
        let (enabled, reconciler) = {
            let rt = self.runtime.lock().await;
            (
                rt.status == PaneStatus::Running && rt.active && rt.visible,
                rt.reconciler.clone(),
            )
        };
        if let Some(sync) = reconciler {
            sync.view().lock().await.set_input_disabled(!enabled);
        }
    }

    /// Routes one keystroke. The echo buffer records it unconditionally so a
    /// later host echo is still suppressed even when the keystroke was never
    /// forwarded.
    pub async fn handle_user_input(&self, data: &str) -> Result<(), SyncError> {
        self.echo.lock().await.record_input(self.pane, data);
        let (forward, owner) = {
            let rt = self.runtime.lock().await;
            (
                rt.status == PaneStatus::Running && rt.active && rt.visible,
                rt.owner.clone(),
            )
        };
        if !forward {
            return Ok(());
        }
        match self
            .host
            .send_input(&owner, data.as_bytes(), Some(self.pane))
            .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(pane = %self.pane, %owner, "input routing failed: {err}");
                self.notify(UserNotice::InputRejected {
                    owner: owner.clone(),
                });
                Err(SyncError::Routing { owner })
            }
        }
    }

    pub async fn handle_resize(&self, cols: u16, rows: u16) -> Result<(), SyncError> {
        let owner = self.runtime.lock().await.owner.clone();
        self.host
            .resize(&owner, cols, rows, Some(self.pane))
            .await
            .map_err(|source| {
                warn!(pane = %self.pane, %owner, "resize failed: {source}");
                SyncError::Sync {
                    owner: owner.clone(),
                    source,
                }
            })
    }

    /// Feeds one message from the host's push channel through the pane.
    /// Events for other owners or stale sessions are ignored.
    pub async fn handle_host_event(&self, event: &HostEvent) -> Result<(), SyncError> {
        match event {
            HostEvent::Output {
                owner,
                session_id,
                event,
            } => {
                let reconciler = {
                    let rt = self.runtime.lock().await;
                    if rt.owner != *owner
                        || rt
                            .session
                            .as_ref()
                            .is_none_or(|session| session.session_id != *session_id)
                    {
                        return Ok(());
                    }
                    rt.reconciler.clone()
                };
                let result = match reconciler {
                    Some(sync) => sync.handle_push(event).await,
                    None => Ok(()),
                };
                self.flush_resume_handles().await;
                result
            }
            HostEvent::Exit {
                owner,
                session_id,
                notice,
            } => self.handle_exit(owner, session_id, notice).await,
        }
    }

    async fn handle_exit(
        &self,
        owner: &WorktreeId,
        session_id: &SessionId,
        notice: &ExitNotice,
    ) -> Result<(), SyncError> {
        let (root_alias, visible) = {
            let mut rt = self.runtime.lock().await;
            if rt.owner != *owner
                || rt
                    .session
                    .as_ref()
                    .is_none_or(|session| session.session_id != *session_id)
            {
                return Ok(());
            }
            rt.status = PaneStatus::Exited;
            rt.session = None;
            rt.last_exit = Some(notice.clone());
            (rt.root_alias.clone(), rt.visible)
        };

        debug!(pane = %self.pane, %owner, ?notice, "session exited");
        self.notify(UserNotice::SessionEnded {
            owner: owner.clone(),
            notice: notice.clone(),
        });
        self.sync_input_state().await;

        if notice.is_abnormal() {
            // The cached resume handle points at a session that died badly;
            // clear it and rebuild from the host's durable logs before any
            // restart.
            let cleared = self.store.lock().await.persist_resume_command(
                owner,
                root_alias.as_ref(),
                None,
            );
            if cleared && let Err(err) = self.host.set_resume_command(owner, None).await {
                warn!(%owner, "failed to clear host resume command: {err}");
            }
            if let Err(err) = self.host.refresh_resume_from_logs(owner).await {
                warn!(%owner, "resume refresh from logs failed: {err}");
            } else {
                match self.host.refresh_resume_command(owner).await {
                    Ok(refreshed) => {
                        self.store.lock().await.persist_resume_command(
                            owner,
                            root_alias.as_ref(),
                            refreshed.as_deref(),
                        );
                    }
                    Err(err) => warn!(%owner, "resume command refresh failed: {err}"),
                }
            }
        }

        // At most one restart per exit event, and only if the pane is still
        // visible once the refresh has completed.
        let still_visible = visible && self.runtime.lock().await.visible;
        if still_visible {
            return self.request_start().await;
        }
        Ok(())
    }

    /// Persists the freshest extracted resume handle, compare-and-set against
    /// the stored value so reprinted announcements cost nothing.
    pub async fn flush_resume_handles(&self) {
        let mut newest: Option<ResumeHandle> = None;
        {
            let mut rx = self.resume_rx.lock().await;
            while let Ok(handle) = rx.try_recv() {
                newest = Some(handle);
            }
        }
        let Some(handle) = newest else {
            return;
        };
        let (owner, root_alias) = {
            let rt = self.runtime.lock().await;
            (rt.owner.clone(), rt.root_alias.clone())
        };
        let changed = self.store.lock().await.persist_resume_command(
            &owner,
            root_alias.as_ref(),
            Some(&handle.raw_command),
        );
        if changed
            && let Err(err) = self
                .host
                .set_resume_command(&owner, Some(&handle.raw_command))
                .await
        {
            warn!(%owner, "failed to persist resume command with host: {err}");
        }
    }

    /// Rebinds the pane to another worktree: persists the outgoing viewport,
    /// rebuilds the reconciler over the same view, and restores the incoming
    /// viewport (or the bottom-anchor default).
    pub async fn switch_worktree(&self, new_owner: WorktreeId) -> Result<(), SyncError> {
        let (old_owner, old_sync, visible) = {
            let rt = self.runtime.lock().await;
            if rt.owner == new_owner {
                return Ok(());
            }
            (rt.owner.clone(), rt.reconciler.clone(), rt.visible)
        };

        let view = if let Some(sync) = &old_sync {
            let viewport = sync.current_viewport().await;
            self.store.lock().await.save_viewport(&old_owner, viewport);
            sync.unmount();
            Some(sync.view())
        } else {
            None
        };

        let new_sync = if let Some(view) = view {
            let sync = Arc::new(PaneReconciler::new(
                self.pane,
                new_owner.clone(),
                Arc::clone(&self.host),
                view,
                Arc::clone(&self.echo),
                Some(self.resume_tx.clone()),
            ));
            let viewport = self
                .store
                .lock()
                .await
                .load_viewport(&new_owner)
                .unwrap_or_default();
            sync.restore_viewport(viewport).await;
            Some(sync)
        } else {
            None
        };

        {
            let mut rt = self.runtime.lock().await;
            rt.owner = new_owner;
            rt.status = PaneStatus::Idle;
            rt.session = None;
            rt.last_exit = None;
            rt.resume_identifier = None;
            rt.throttle_until = None;
            rt.start_in_flight = None;
            rt.reconciler = new_sync;
        }
        // Buffered input belonged to the previous session's echo stream.
        self.echo.lock().await.remove_pane(self.pane);

        if visible {
            return self.request_start().await;
        }
        Ok(())
    }

    /// Tears the pane down: persists the viewport, stops any pending
    /// hydration, and drops per-pane caches. The session itself keeps
    /// running; other panes may still be attached to it.
    pub async fn unmount(&self) {
        let (owner, reconciler) = {
            let mut rt = self.runtime.lock().await;
            (rt.owner.clone(), rt.reconciler.take())
        };
        if let Some(sync) = reconciler {
            let viewport = sync.current_viewport().await;
            self.store.lock().await.save_viewport(&owner, viewport);
            sync.unmount();
        }
        self.echo.lock().await.remove_pane(self.pane);
    }

    fn notify(&self, notice: UserNotice) {
        let _ = self.notices.send(notice);
    }
}
