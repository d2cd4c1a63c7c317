pub mod argv;
pub mod bridge;
pub mod event_loop;
pub mod loader;
pub mod namespace;
pub mod registry;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, info};

use crate::error::{BootstrapError, Result};
use argv::ArgvBuilder;
use bridge::{FailureBridge, FailureHooks, FailureKind, FailureRecord};
use event_loop::{LoopEngine, LoopHandle, bind_event_loop};
use loader::{Require, run_source};
use namespace::{FAILURE_HOOKS, GlobalNamespace, REQUIRE, RESERVED, UTIL};
use registry::ModuleRegistry;

/// Proof that every pre-program load has finished and the registry was swept.
///
/// Only [`ScriptContext::complete_preloads`] issues one, once per context,
/// and rebinding `require` consumes it.
#[derive(Debug)]
pub struct PreloadsComplete {
    _private: (),
}

/// Everything the bootstrap sets up for one interpreter: the global
/// namespace, the module registry, the root loader and the failure bridge.
///
/// All methods are meant to be called from the thread that will drive the
/// event loop, before the loop runs.
pub struct ScriptContext {
    namespace: GlobalNamespace,
    registry: Arc<ModuleRegistry>,
    bridge: Arc<FailureBridge>,
    /// Loader anchored at the bootstrap location; `require` descends from it
    root_require: Py<Require>,
    anchor: PathBuf,
    loop_installed: AtomicBool,
    preloads_complete: AtomicBool,
}

impl ScriptContext {
    /// Build the namespace and publish the root `require` and `failure_hooks`
    pub fn initialize(
        py: Python<'_>,
        anchor: impl Into<PathBuf>,
        bridge: Arc<FailureBridge>,
    ) -> Result<Self> {
        let anchor = anchor.into();
        let namespace = GlobalNamespace::new(py)?;
        let registry = Arc::new(ModuleRegistry::new());

        let root_require = Py::new(
            py,
            Require::new(py, anchor.clone(), registry.clone(), &namespace),
        )?;
        namespace.set(py, REQUIRE, root_require.bind(py))?;
        namespace.set(
            py,
            FAILURE_HOOKS,
            Bound::new(py, FailureHooks::new(bridge.clone()))?,
        )?;

        info!(anchor = %anchor.display(), "script context initialized");
        Ok(Self {
            namespace,
            registry,
            bridge,
            root_require,
            anchor,
            loop_installed: AtomicBool::new(false),
            preloads_complete: AtomicBool::new(false),
        })
    }

    pub fn namespace(&self) -> &GlobalNamespace {
        &self.namespace
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<FailureBridge> {
        &self.bridge
    }

    pub fn anchor(&self) -> &Path {
        &self.anchor
    }

    /// Install the loop engine's primitives as globals. Once per context.
    pub fn prepare_event_loop(
        &self,
        py: Python<'_>,
        engine: &dyn LoopEngine,
    ) -> Result<LoopHandle> {
        if self.loop_installed.load(Ordering::SeqCst) {
            return Err(BootstrapError::LoopAlreadyInstalled);
        }
        let handle = bind_event_loop(py, engine, &self.namespace, &self.bridge)?;
        self.loop_installed.store(true, Ordering::SeqCst);
        Ok(handle)
    }

    /// Reset the global `arguments` and return its appender
    pub fn make_argv_builder(&self, py: Python<'_>) -> Result<ArgvBuilder> {
        Ok(argv::make_argv_builder(py, &self.namespace)?)
    }

    fn ensure_preloading(&self) -> Result<()> {
        if self.preloads_complete.load(Ordering::SeqCst) {
            return Err(BootstrapError::PreloadsClosed);
        }
        Ok(())
    }

    /// Load a module through the global `require` before the program starts
    pub fn preload<'py>(&self, py: Python<'py>, id: &str) -> Result<Bound<'py, PyAny>> {
        self.ensure_preloading()?;
        let require = self
            .namespace
            .get(py, REQUIRE)?
            .ok_or(BootstrapError::MissingGlobal(REQUIRE))?;
        debug!(id, "preloading module");
        Ok(require.call1((id,))?)
    }

    /// Run a code snippet before the program starts
    pub fn eval_snippet(&self, py: Python<'_>, code: &str) -> Result<()> {
        self.ensure_preloading()?;
        let globals = self.fresh_globals(py, "__main__", None)?;
        run_source(py, code, "<eval>", &globals)?;
        Ok(())
    }

    /// Close the pre-program phase: sweep the registry and issue the token
    /// that allows `require` to be rebound.
    pub fn complete_preloads(&self) -> Result<PreloadsComplete> {
        if self.preloads_complete.swap(true, Ordering::SeqCst) {
            return Err(BootstrapError::PreloadsClosed);
        }
        let swept = self.registry.sweep();
        info!(swept, "pre-program loads complete");
        Ok(PreloadsComplete { _private: () })
    }

    fn program_path(&self, program: &Path) -> PathBuf {
        if program.is_absolute() {
            program.to_path_buf()
        } else {
            self.anchor.join(program)
        }
    }

    /// Publish a `require` descended at the program's directory.
    ///
    /// It shares the registry with the root loader, so modules loaded so far
    /// stay cache hits.
    pub fn rebind_require(
        &self,
        py: Python<'_>,
        _token: PreloadsComplete,
        program: &Path,
    ) -> Result<()> {
        let program = self.program_path(program);
        let program_dir = program
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.anchor.clone());
        let program_dir = program_dir.canonicalize().unwrap_or(program_dir);

        let descended = self.root_require.get().descend(py, program_dir.clone());
        self.namespace.set(py, REQUIRE, Bound::new(py, descended)?)?;
        info!(anchor = %program_dir.display(), "rebound global require");
        Ok(())
    }

    /// Rebind `require` and run the program module as `__main__`.
    ///
    /// The program has no module-local `require`; it resolves through the
    /// rebound global one.
    pub fn run_program(
        &self,
        py: Python<'_>,
        token: PreloadsComplete,
        program: &Path,
    ) -> Result<()> {
        let path = self.program_path(program);
        let source = fs::read_to_string(&path).map_err(|source| BootstrapError::Io {
            path: path.clone(),
            source,
        })?;

        self.rebind_require(py, token, &path)?;

        let globals = self.fresh_globals(py, "__main__", Some(&path))?;
        info!(program = %path.display(), "running program module");
        run_source(py, &source, &path.to_string_lossy(), &globals)?;
        Ok(())
    }

    /// Publish the `util` helpers for interactive sessions
    pub fn init_repl_libs(&self, py: Python<'_>) -> Result<()> {
        let util = self.root_require.get().require(py, "util")?;
        self.namespace.set(py, UTIL, util)?;
        debug!("published util");
        Ok(())
    }

    /// Globals for code the host runs directly (program, snippets, REPL lines)
    pub fn fresh_globals<'py>(
        &self,
        py: Python<'py>,
        name: &str,
        file: Option<&Path>,
    ) -> PyResult<Bound<'py, PyDict>> {
        let globals = PyDict::new(py);
        self.namespace.attach_to(py, &globals)?;
        globals.set_item("__name__", name)?;
        if let Some(file) = file {
            globals.set_item("__file__", file.to_string_lossy())?;
        }
        Ok(globals)
    }

    /// Hand an error that escaped synchronous script code to the bridge
    pub fn report_uncaught(&self, py: Python<'_>, err: BootstrapError) {
        match err {
            BootstrapError::Python(e) => self.bridge.uncaught_exception(py, &e),
            other => self.bridge.report(&FailureRecord::from_message(
                FailureKind::UncaughtException,
                other.to_string(),
            )),
        }
    }

    /// Close the loop, empty the registry and remove the globals the
    /// bootstrap published.
    pub fn teardown(self, py: Python<'_>, event_loop: Option<LoopHandle>) -> Result<()> {
        if let Some(handle) = event_loop {
            for name in handle.published_globals() {
                self.namespace.remove(py, name)?;
            }
            handle.close(py)?;
        }
        self.registry.sweep();
        for name in RESERVED {
            self.namespace.remove(py, name)?;
        }
        debug!("script context torn down");
        Ok(())
    }
}
