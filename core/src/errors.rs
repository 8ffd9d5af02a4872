use anyhow::Error as AnyhowError;
use panesync_protocol::WorktreeId;
use thiserror::Error;

/// Failure reported by a `SessionHost` implementation. The message is safe to
/// show to the user; the source carries the host-specific cause.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HostError {
    message: String,
    #[source]
    source: Option<AnyhowError>,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: AnyhowError) -> Self {
        Self {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Error taxonomy of the synchronization core. Every variant is caught at the
/// operation boundary and converted to a user notice plus a tracing
/// diagnostic; none may crash the reconciliation loop.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The host could not spawn the session. Retryable only via an explicit
    /// new trigger (visibility change or manual start).
    #[error("failed to start session for {owner}: {source}")]
    StartFailure {
        owner: WorktreeId,
        #[source]
        source: HostError,
    },
    /// Input was sent while no running session matched. Surfaced as a
    /// notification, not fatal.
    #[error("no running session for {owner}")]
    Routing { owner: WorktreeId },
    /// A snapshot or delta fetch failed. Logged and retried on the next
    /// triggering event; never corrupts the local cursor.
    #[error("transcript sync failed for {owner}: {source}")]
    Sync {
        owner: WorktreeId,
        #[source]
        source: HostError,
    },
}
