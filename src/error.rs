use std::path::PathBuf;

use pyo3::PyErr;
use pyo3::exceptions::{PyModuleNotFoundError, PyOSError, PyRuntimeError};
use thiserror::Error;

/// Errors raised while bootstrapping the script environment
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Python(#[from] PyErr),

    /// A loop method would shadow one of the host's own well-known globals
    #[error("global '{0}' is reserved by the host")]
    ReservedGlobal(String),

    /// A loop method would overwrite an unrelated global already present
    #[error("global '{0}' is already defined")]
    DuplicateGlobal(String),

    #[error("an event loop has already been installed")]
    LoopAlreadyInstalled,

    /// Pre-program loads were attempted after the registry sweep
    #[error("pre-program loads are already complete")]
    PreloadsClosed,

    #[error("'{0}' is not available in the global namespace")]
    MissingGlobal(&'static str),

    #[error("module not found: '{id}' (from {})", anchor.display())]
    ModuleNotFound { id: String, anchor: PathBuf },

    #[error("REPL failed: {0}")]
    Repl(String),

    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

impl From<BootstrapError> for PyErr {
    fn from(err: BootstrapError) -> Self {
        match err {
            BootstrapError::Python(e) => e,
            e @ BootstrapError::ModuleNotFound { .. } => {
                PyModuleNotFoundError::new_err(e.to_string())
            }
            e @ BootstrapError::Io { .. } => PyOSError::new_err(e.to_string()),
            e => PyRuntimeError::new_err(e.to_string()),
        }
    }
}
