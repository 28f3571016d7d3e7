//! In-process registry of live sandbox handles, keyed by task id.
//!
//! The registry is a cache: it never owns a handle and never closes one.
//! A missing entry means "reconnect by the persisted sandbox id", never
//! "the sandbox does not exist".

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::debug;

use super::SandboxHandle;

struct Entry {
    handle: Weak<dyn SandboxHandle>,
    keep_alive: bool,
}

/// Maps task ids to the sandbox currently serving them.
#[derive(Default)]
pub(crate) struct SandboxRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl SandboxRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the handle for a task, replacing any earlier one.
    pub fn register(&self, task_id: &str, handle: &Arc<dyn SandboxHandle>, keep_alive: bool) {
        debug!(task_id, sandbox_id = handle.id(), keep_alive, "Registering sandbox");
        let entry = Entry {
            handle: Arc::downgrade(handle),
            keep_alive,
        };
        self.write().insert(task_id.to_string(), entry);
    }

    /// Returns the live handle for a task, if one is registered and still held.
    pub fn get(&self, task_id: &str) -> Option<Arc<dyn SandboxHandle>> {
        self.read()
            .get(task_id)
            .and_then(|entry| entry.handle.upgrade())
    }

    /// Forgets the handle for a task.
    pub fn remove(&self, task_id: &str) {
        if self.write().remove(task_id).is_some() {
            debug!(task_id, "Removed sandbox from registry");
        }
    }

    /// Whether the task's sandbox should outlive the task run.
    pub fn should_keep_alive(&self, task_id: &str) -> bool {
        self.read().get(task_id).is_some_and(|entry| entry.keep_alive)
    }

    /// Number of registered entries, live or not.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        // Inserts and removals are single operations; a poisoned map is still consistent.
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
