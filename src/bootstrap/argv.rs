use pyo3::prelude::*;
use pyo3::types::PyList;
use tracing::debug;

use super::namespace::{ARGUMENTS, GlobalNamespace};

/// Appender for the global `arguments` list.
///
/// Program arguments cross into the interpreter one value at a time, in
/// order, before the program runs. The builder is also callable from script
/// code with a single string.
#[pyclass(frozen, module = "script_host")]
pub struct ArgvBuilder {
    arguments: Py<PyList>,
}

impl ArgvBuilder {
    pub fn push(&self, py: Python<'_>, arg: &str) -> PyResult<()> {
        self.arguments.bind(py).append(arg)
    }

    pub fn extend<I, S>(&self, py: Python<'_>, args: I) -> PyResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.push(py, arg.as_ref())?;
        }
        Ok(())
    }

    pub fn len(&self, py: Python<'_>) -> usize {
        self.arguments.bind(py).len()
    }

    pub fn is_empty(&self, py: Python<'_>) -> bool {
        self.len(py) == 0
    }
}

#[pymethods]
impl ArgvBuilder {
    fn __call__(&self, py: Python<'_>, arg: &str) -> PyResult<()> {
        self.push(py, arg)
    }
}

/// Reset the global `arguments` to an empty list and return its appender
pub fn make_argv_builder(py: Python<'_>, namespace: &GlobalNamespace) -> PyResult<ArgvBuilder> {
    let arguments = PyList::empty(py);
    namespace.set(py, ARGUMENTS, &arguments)?;
    debug!("reset global arguments");
    Ok(ArgvBuilder {
        arguments: arguments.unbind(),
    })
}
