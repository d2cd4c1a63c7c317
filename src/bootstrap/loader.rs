use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, trace};

use super::namespace::GlobalNamespace;
use super::registry::ModuleRegistry;
use crate::error::{BootstrapError, Result};

// Embed built-in modules at compile time
const UTIL: &str = include_str!("../../python/util.py");

/// Modules resolved by bare id rather than by path
pub const BUILTIN_MODULES: &[(&str, &str)] = &[("util", UTIL)];

fn builtin_source(id: &str) -> Option<&'static str> {
    BUILTIN_MODULES
        .iter()
        .find(|(name, _)| *name == id)
        .map(|(_, source)| *source)
}

/// Compile `source` under `filename` and run it in `globals`
pub(crate) fn run_source(
    py: Python<'_>,
    source: &str,
    filename: &str,
    globals: &Bound<'_, PyDict>,
) -> PyResult<()> {
    let builtins = py.import("builtins")?;
    let code = builtins
        .getattr("compile")?
        .call1((source, filename, "exec"))?;
    builtins.getattr("exec")?.call1((code, globals))?;
    Ok(())
}

enum Resolved {
    Builtin(&'static str),
    File(PathBuf),
}

/// A module loader anchored at one directory.
///
/// Ids starting with `./`, `../` or `/` are paths relative to the anchor;
/// `.py` is appended when missing and a directory means its `__init__.py`.
/// Any other id names an embedded built-in. Loaders made with
/// [`Require::descend`] share the registry, so they agree on what is
/// already loaded and differ only in where relative ids start from.
#[pyclass(frozen, module = "script_host")]
pub struct Require {
    anchor: PathBuf,
    registry: Arc<ModuleRegistry>,
    namespace: Py<PyDict>,
}

impl Require {
    pub fn new(
        py: Python<'_>,
        anchor: impl Into<PathBuf>,
        registry: Arc<ModuleRegistry>,
        namespace: &GlobalNamespace,
    ) -> Self {
        Self {
            anchor: anchor.into(),
            registry,
            namespace: namespace.bind(py).clone().unbind(),
        }
    }

    /// Same registry, different resolution anchor
    pub fn descend(&self, py: Python<'_>, anchor: impl Into<PathBuf>) -> Self {
        Self {
            anchor: anchor.into(),
            registry: self.registry.clone(),
            namespace: self.namespace.clone_ref(py),
        }
    }

    pub fn anchor(&self) -> &Path {
        &self.anchor
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    fn resolve_id(&self, id: &str) -> Result<(String, Resolved)> {
        let is_path = id.starts_with("./") || id.starts_with("../") || Path::new(id).is_absolute();
        if !is_path {
            return match builtin_source(id) {
                Some(source) => Ok((id.to_string(), Resolved::Builtin(source))),
                None => Err(self.not_found(id)),
            };
        }

        let base = self.anchor.join(id);
        let mut candidates = vec![base.clone()];
        if base.extension().is_none_or(|ext| ext != "py") {
            let mut with_ext = base.clone().into_os_string();
            with_ext.push(".py");
            candidates.push(PathBuf::from(with_ext));
        }
        candidates.push(base.join("__init__.py"));

        let found = candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| self.not_found(id))?;
        let path = found
            .canonicalize()
            .map_err(|source| BootstrapError::Io {
                path: found.clone(),
                source,
            })?;
        Ok((path.to_string_lossy().into_owned(), Resolved::File(path)))
    }

    fn not_found(&self, id: &str) -> BootstrapError {
        BootstrapError::ModuleNotFound {
            id: id.to_string(),
            anchor: self.anchor.clone(),
        }
    }

    /// The registry key `id` resolves to from this anchor
    pub fn resolve(&self, id: &str) -> Result<String> {
        self.resolve_id(id).map(|(key, _)| key)
    }

    /// Load `id`, or return the cached module if it is already registered
    pub fn require<'py>(&self, py: Python<'py>, id: &str) -> Result<Bound<'py, PyModule>> {
        let (key, resolved) = self.resolve_id(id)?;
        if let Some(module) = self.registry.get(py, &key) {
            trace!(id, key = %key, "module cache hit");
            return Ok(module.into_bound(py));
        }

        match resolved {
            Resolved::Builtin(source) => {
                self.execute(py, &key, &key, source, &format!("<builtin {key}>"), None)
            }
            Resolved::File(path) => {
                let source = fs::read_to_string(&path).map_err(|source| BootstrapError::Io {
                    path: path.clone(),
                    source,
                })?;
                let name = path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| key.clone());
                self.execute(py, &key, &name, &source, &key, Some(&path))
            }
        }
    }

    fn execute<'py>(
        &self,
        py: Python<'py>,
        key: &str,
        name: &str,
        source: &str,
        filename: &str,
        path: Option<&Path>,
    ) -> Result<Bound<'py, PyModule>> {
        let module = PyModule::new(py, name)?;
        let globals = module.dict();
        globals.set_item("__builtins__", self.namespace.bind(py))?;
        if let Some(path) = path {
            globals.set_item("__file__", path.to_string_lossy())?;
        }
        let anchor = path.and_then(Path::parent).unwrap_or(&self.anchor);
        globals.set_item("require", Bound::new(py, self.descend(py, anchor))?)?;

        // Registered before running so circular requires see the partial module
        self.registry.insert(key, module.clone().unbind());
        if let Err(e) = run_source(py, source, filename, &globals) {
            self.registry.remove(key);
            return Err(e.into());
        }
        debug!(key, "module loaded");
        Ok(module)
    }
}

#[pymethods]
impl Require {
    fn __call__<'py>(&self, py: Python<'py>, id: &str) -> PyResult<Bound<'py, PyModule>> {
        Ok(self.require(py, id)?)
    }

    #[pyo3(name = "resolve")]
    fn py_resolve(&self, id: &str) -> PyResult<String> {
        Ok(self.resolve(id)?)
    }

    /// Snapshot of the shared registry
    #[getter]
    fn cache<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        self.registry.snapshot(py)
    }

    #[getter(anchor)]
    fn py_anchor(&self) -> String {
        self.anchor.to_string_lossy().into_owned()
    }

    fn __repr__(&self) -> String {
        format!("<require anchored at {}>", self.anchor.display())
    }
}
