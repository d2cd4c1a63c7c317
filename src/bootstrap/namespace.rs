use std::collections::HashSet;

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::error::{BootstrapError, Result};

/// The program argument list
pub const ARGUMENTS: &str = "arguments";
/// The module loader visible to script code
pub const REQUIRE: &str = "require";
/// General-purpose helpers published for interactive sessions
pub const UTIL: &str = "util";
/// Install site of the two terminal failure handlers
pub const FAILURE_HOOKS: &str = "failure_hooks";

/// Globals owned by the host; nothing else may be published under these names
pub const RESERVED: [&str; 4] = [ARGUMENTS, REQUIRE, UTIL, FAILURE_HOOKS];

/// Process-wide key/value surface shared by every module the host runs.
///
/// The namespace is a copy of the interpreter's `builtins` dict. Each module
/// and program is executed with it as `__builtins__`, so a name written here
/// is visible from all script code unless a module shadows it locally.
pub struct GlobalNamespace {
    dict: Py<PyDict>,
}

impl GlobalNamespace {
    pub fn new(py: Python<'_>) -> PyResult<Self> {
        let builtins = py.import("builtins")?.dict().copy()?;
        Ok(Self {
            dict: builtins.unbind(),
        })
    }

    pub fn bind<'py>(&self, py: Python<'py>) -> &Bound<'py, PyDict> {
        self.dict.bind(py)
    }

    pub fn get<'py>(&self, py: Python<'py>, name: &str) -> PyResult<Option<Bound<'py, PyAny>>> {
        self.dict.bind(py).get_item(name)
    }

    pub fn contains(&self, py: Python<'_>, name: &str) -> PyResult<bool> {
        self.dict.bind(py).contains(name)
    }

    /// Write one of the host's well-known keys
    pub(crate) fn set<'py>(
        &self,
        py: Python<'py>,
        name: &str,
        value: impl IntoPyObject<'py>,
    ) -> PyResult<()> {
        self.dict.bind(py).set_item(name, value)
    }

    pub(crate) fn remove(&self, py: Python<'_>, name: &str) -> PyResult<()> {
        let dict = self.dict.bind(py);
        if dict.contains(name)? {
            dict.del_item(name)?;
        }
        Ok(())
    }

    /// Publish a batch of globals, all or nothing.
    ///
    /// Every name is checked before the first write: reserved names, names
    /// already present in the namespace and repeats within the batch are
    /// rejected and leave the namespace untouched.
    pub fn publish_all<'py>(
        &self,
        py: Python<'py>,
        entries: &[(String, Bound<'py, PyAny>)],
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for (name, _) in entries {
            if RESERVED.contains(&name.as_str()) {
                return Err(BootstrapError::ReservedGlobal(name.clone()));
            }
            if !seen.insert(name.as_str()) || self.contains(py, name)? {
                return Err(BootstrapError::DuplicateGlobal(name.clone()));
            }
        }

        let dict = self.dict.bind(py);
        for (name, value) in entries {
            dict.set_item(name, value)?;
        }
        Ok(())
    }

    /// Point a module's globals at this namespace for builtin lookups
    pub fn attach_to(&self, py: Python<'_>, globals: &Bound<'_, PyDict>) -> PyResult<()> {
        globals.set_item("__builtins__", self.dict.bind(py))
    }
}
