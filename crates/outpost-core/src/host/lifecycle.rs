//! Tracking of live workers.
//!
//! The host only holds weak references: a worker nobody holds a handle to
//! is dropped (and thereby terminated) regardless of this table.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use rustc_hash::FxHashMap;
use uuid::Uuid;

use super::session::Session;

/// Unique identifier of a worker created by a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(Uuid);

impl WorkerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub(crate) struct Lifecycle {
    workers: Mutex<FxHashMap<WorkerId, Weak<Session>>>,
}

impl Lifecycle {
    pub(crate) fn track(&self, id: WorkerId, session: Weak<Session>) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, weak| weak.strong_count() > 0);
        workers.insert(id, session);
    }

    pub(crate) fn get(&self, id: WorkerId) -> Option<Arc<Session>> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, weak| weak.strong_count() > 0);
        workers.get(&id).and_then(Weak::upgrade)
    }

    pub(crate) fn forget(&self, id: WorkerId) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Take every session still alive, clearing the table.
    pub(crate) fn drain(&self) -> Vec<Arc<Session>> {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.drain().filter_map(|(_, weak)| weak.upgrade()).collect()
    }

    /// Number of tracked workers that are neither dropped nor terminated.
    pub(crate) fn live(&self) -> usize {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|_, weak| weak.strong_count() > 0);
        workers
            .values()
            .filter_map(Weak::upgrade)
            .filter(|session| !session.is_terminated())
            .count()
    }
}
