//! Synchronization core for long-lived terminal sessions displayed by
//! transient UI panes.
//!
//! A session lives in a host process and outlives any single pane; panes
//! mount, unmount, hide, and resize freely while the transcript they show
//! must stay consistent, gap-free, and duplicate-free. The modules here form
//! the reconciliation pipeline between the host's append-only event log and
//! any number of local consumers:
//!
//! - [`overlap`] trims duplicated chunk boundaries,
//! - [`echo`] strips the host's echo of locally rendered keystrokes,
//! - [`resume`] recovers session-resume announcements from output,
//! - [`reconciler`] keeps a per-pane cursor over the event log,
//! - [`pane`] drives the pane lifecycle and input policy,
//! - [`busy`] raises a one-shot notification for long busy periods.
//!
//! Process/PTY management, rendering, and storage stay behind the
//! [`host::SessionHost`], [`view::TerminalView`], and [`persist::StateStore`]
//! traits.

pub mod busy;
pub mod echo;
pub mod errors;
pub mod host;
pub mod overlap;
pub mod pane;
pub mod persist;
pub mod reconciler;
pub mod registry;
pub mod resume;
pub mod testing;
pub mod view;

pub use busy::BusyTracker;
pub use busy::SessionActivity;
pub use echo::EchoSuppressor;
pub use errors::HostError;
pub use errors::SyncError;
pub use host::HostEvent;
pub use host::SessionHost;
pub use host::StartOptions;
pub use overlap::overlap;
pub use pane::PaneController;
pub use pane::PaneStatus;
pub use pane::UserNotice;
pub use persist::StateStore;
pub use persist::SyncStore;
pub use reconciler::PaneReconciler;
pub use registry::ViewInstanceId;
pub use registry::ViewRegistry;
pub use resume::extract_resume_command;
pub use view::SharedView;
pub use view::TerminalView;
