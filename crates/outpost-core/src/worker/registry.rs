//! Named worker entry points.
//!
//! A host never ships code to a worker. It names an entry, and the worker
//! side (the same process for thread workers, the worker binary for process
//! workers) looks the factory up here.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::operation::OperationTable;
use super::scope::Scope;

/// Builds a worker's operation table from its captures. Runs exactly once per worker.
pub type Factory = Arc<dyn Fn(&Scope) -> OperationTable + Send + Sync>;

/// Entry name → factory.
#[derive(Clone, Default)]
pub struct Registry {
    factories: FxHashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one with the same name.
    pub fn register<F>(mut self, entry: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Scope) -> OperationTable + Send + Sync + 'static,
    {
        self.insert(entry, factory);
        self
    }

    pub fn insert<F>(&mut self, entry: impl Into<String>, factory: F)
    where
        F: Fn(&Scope) -> OperationTable + Send + Sync + 'static,
    {
        self.factories.insert(entry.into(), Arc::new(factory));
    }

    pub fn get(&self, entry: &str) -> Option<Factory> {
        self.factories.get(entry).cloned()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.factories.contains_key(entry)
    }

    /// Registered entry names, sorted.
    pub fn entries(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entries", &self.entries())
            .finish()
    }
}
