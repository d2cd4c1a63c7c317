use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::debug;

type Entries = BTreeMap<String, Py<PyModule>>;

/// Cache of loaded modules keyed by resolved module id.
///
/// File modules are keyed by their canonical path, embedded built-ins by
/// their bare name. Every loader descended from the same root shares one
/// registry, so a module loaded through any of them is a cache hit for all.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: RwLock<Entries>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, py: Python<'_>, id: &str) -> Option<Py<PyModule>> {
        self.read().get(id).map(|module| module.clone_ref(py))
    }

    pub fn insert(&self, id: impl Into<String>, module: Py<PyModule>) {
        self.write().insert(id.into(), module);
    }

    pub fn remove(&self, id: &str) -> Option<Py<PyModule>> {
        self.write().remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Remove every registered module and return how many were dropped.
    ///
    /// Anything loaded before the program starts is infrastructure. Whoever
    /// needed those modules has kept its own reference by now, so the
    /// registry is emptied to keep them out of reach of user code.
    pub fn sweep(&self) -> usize {
        let swept = std::mem::take(&mut *self.write());
        let count = swept.len();
        if count > 0 {
            debug!(count, ids = ?swept.keys().collect::<Vec<_>>(), "swept module registry");
        }
        count
    }

    /// A fresh dict of id -> module, handed to script code as `require.cache`
    pub fn snapshot<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let dict = PyDict::new(py);
        for (id, module) in self.read().iter() {
            dict.set_item(id, module.bind(py))?;
        }
        Ok(dict)
    }
}
