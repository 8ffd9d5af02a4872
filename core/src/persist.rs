//! Key-value persistence for pane state that must survive the UI process.
//!
//! The storage mechanics are external; the core only assumes string-keyed
//! get/set with explicit clears. Two records are kept per worktree: the last
//! viewport and the last persisted resume command. Resume-command writes are
//! compare-and-set so a handle reprinted on every prompt never causes
//! redundant storage churn.

use panesync_protocol::ViewportRecord;
use panesync_protocol::WorktreeId;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Minimal key-value storage contract. Setting `None` removes the key.
pub trait StateStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: Option<&str>);
}

/// In-memory store, used in tests and as a default for embedders that opt
/// out of persistence.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: std::collections::HashMap<String, String>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.entries.insert(key.to_string(), value.to_string());
            }
            None => {
                self.entries.remove(key);
            }
        }
    }
}

fn viewport_key(owner: &WorktreeId) -> String {
    format!("viewport/{owner}")
}

fn resume_key(owner: &WorktreeId) -> String {
    format!("resume-command/{owner}")
}

/// Typed access to the two per-worktree records on top of a raw
/// [`StateStore`].
pub struct SyncStore {
    store: Box<dyn StateStore>,
}

impl SyncStore {
    pub fn new(store: Box<dyn StateStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStateStore::new()))
    }

    fn get_record<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(key, "discarding unreadable persisted record: {err}");
                None
            }
        }
    }

    fn set_record<T: Serialize>(&mut self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, Some(&raw)),
            Err(err) => warn!(key, "failed to serialize persisted record: {err}"),
        }
    }

    pub fn save_viewport(&mut self, owner: &WorktreeId, viewport: ViewportRecord) {
        self.set_record(&viewport_key(owner), &viewport);
    }

    pub fn load_viewport(&self, owner: &WorktreeId) -> Option<ViewportRecord> {
        self.get_record(&viewport_key(owner))
    }

    pub fn last_resume_command(&self, owner: &WorktreeId) -> Option<String> {
        self.store.get(&resume_key(owner))
    }

    /// Compare-and-set write of the resume command, mirrored to `root_alias`
    /// when the worktree has one. Returns whether anything was written;
    /// re-persisting an identical value is a no-op. Clearing (`None`) is
    /// explicit and only ever requested on abnormal exit.
    pub fn persist_resume_command(
        &mut self,
        owner: &WorktreeId,
        root_alias: Option<&WorktreeId>,
        command: Option<&str>,
    ) -> bool {
        let key = resume_key(owner);
        if self.store.get(&key).as_deref() == command {
            return false;
        }
        self.store.set(&key, command);
        if let Some(alias) = root_alias {
            self.store.set(&resume_key(alias), command);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn worktree(name: &str) -> WorktreeId {
        WorktreeId::new(name)
    }

    #[test]
    fn viewport_round_trips_per_worktree() {
        let mut store = SyncStore::in_memory();
        let w1 = worktree("w1");
        let w2 = worktree("w2");
        store.save_viewport(
            &w1,
            ViewportRecord {
                position: 120,
                at_bottom: false,
            },
        );

        assert_eq!(
            store.load_viewport(&w1),
            Some(ViewportRecord {
                position: 120,
                at_bottom: false,
            })
        );
        assert_eq!(store.load_viewport(&w2), None);
    }

    #[test]
    fn identical_resume_command_is_not_rewritten() {
        let mut store = SyncStore::in_memory();
        let owner = worktree("w1");
        assert!(store.persist_resume_command(&owner, None, Some("codex resume abc")));
        assert!(!store.persist_resume_command(&owner, None, Some("codex resume abc")));
        assert!(store.persist_resume_command(&owner, None, Some("codex resume def")));
        assert_eq!(
            store.last_resume_command(&owner),
            Some("codex resume def".to_string())
        );
    }

    #[test]
    fn clearing_is_explicit_and_mirrored_to_the_root_alias() {
        let mut store = SyncStore::in_memory();
        let owner = worktree("w1");
        let root = worktree("root");
        store.persist_resume_command(&owner, Some(&root), Some("codex resume abc"));
        assert_eq!(
            store.last_resume_command(&root),
            Some("codex resume abc".to_string())
        );

        assert!(store.persist_resume_command(&owner, Some(&root), None));
        assert_eq!(store.last_resume_command(&owner), None);
        assert_eq!(store.last_resume_command(&root), None);
    }

    #[test]
    fn unreadable_viewport_record_is_discarded() {
        let mut raw = MemoryStateStore::new();
        raw.set("viewport/w1", Some("not json"));
        let store = SyncStore::new(Box::new(raw));
        assert_eq!(store.load_viewport(&worktree("w1")), None);
    }
}
