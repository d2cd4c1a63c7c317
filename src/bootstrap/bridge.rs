//! Terminal failure bridge.
//!
//! Uncaught failures in script code end up here: synchronous errors from
//! the program, preloads and eval snippets as "uncaught exceptions", and
//! errors raised from event-loop callbacks as "unhandled rejections". Each
//! kind has one replaceable handler slot. The default handler writes a
//! diagnostic and asks the host to exit with status 1.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, PoisonError, RwLock};

use crossterm::style::Stylize;
use crossterm::tty::IsTty;
use pyo3::exceptions::PyBaseException;
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTracebackMethods};
use tracing::{debug, warn};

/// Status handed to the host-exit capability by the default handlers
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// An error escaped synchronous script code
    UncaughtException,
    /// An error escaped a callback or task run by the event loop
    UnhandledRejection,
}

impl FailureKind {
    pub fn label(self) -> &'static str {
        match self {
            FailureKind::UncaughtException => "uncaught exception",
            FailureKind::UnhandledRejection => "unhandled rejection",
        }
    }
}

/// An error captured at the moment it went unhandled
#[derive(Debug)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub type_name: String,
    pub message: String,
    pub traceback: Option<String>,
    /// The script-level error object, when there was one
    pub error: Option<Py<PyAny>>,
}

impl FailureRecord {
    pub fn from_pyerr(py: Python<'_>, kind: FailureKind, err: &PyErr) -> Self {
        let type_name = err
            .get_type(py)
            .name()
            .map(|name| name.to_string())
            .unwrap_or_else(|_| "Exception".to_string());
        let message = err
            .value(py)
            .str()
            .map(|s| s.to_string())
            .unwrap_or_default();
        let traceback = err.traceback(py).and_then(|tb| tb.format().ok());

        Self {
            kind,
            type_name,
            message,
            traceback,
            error: Some(err.value(py).clone().into_any().unbind()),
        }
    }

    /// Capture an arbitrary value. Rejections are not always exceptions.
    pub fn from_value(py: Python<'_>, kind: FailureKind, value: &Bound<'_, PyAny>) -> Self {
        if value.is_instance_of::<PyBaseException>() {
            return Self::from_pyerr(py, kind, &PyErr::from_value(value.clone()));
        }

        let type_name = value
            .get_type()
            .name()
            .map(|name| name.to_string())
            .unwrap_or_else(|_| "object".to_string());
        let message = value
            .str()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| "<unprintable value>".to_string());

        Self {
            kind,
            type_name,
            message,
            traceback: None,
            error: Some(value.clone().unbind()),
        }
    }

    pub fn from_message(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            type_name: "Error".to_string(),
            message: message.into(),
            traceback: None,
            error: None,
        }
    }
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(traceback) = &self.traceback {
            f.write_str(traceback)?;
        }
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

/// Where failure diagnostics are written
pub trait DiagnosticSink: Send + Sync {
    fn write_failure(&self, record: &FailureRecord);
}

/// Writes diagnostics to the process's stderr
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn write_failure(&self, record: &FailureRecord) {
        let stderr = io::stderr();
        let header = format!("{}:", record.kind.label());
        let header = if stderr.is_tty() {
            header.red().bold().to_string()
        } else {
            header
        };

        let mut out = stderr.lock();
        let _ = writeln!(out, "{header}");
        let _ = writeln!(out, "{record}");
        let _ = out.flush();
    }
}

/// The host's process-termination primitive
pub trait HostExit: Send + Sync {
    /// Request termination with `status`. The real implementation never returns.
    fn exit(&self, status: i32);
}

/// Flushes the interpreter's and the host's standard streams, then exits
pub struct ProcessExit;

impl HostExit for ProcessExit {
    fn exit(&self, status: i32) {
        Python::attach(|py| {
            if let Ok(sys) = py.import("sys") {
                for stream in ["stdout", "stderr"] {
                    if let Ok(stream) = sys.getattr(stream) {
                        let _ = stream.call_method0("flush");
                    }
                }
            }
        });
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
        std::process::exit(status);
    }
}

pub type FailureHandler = Arc<dyn Fn(&FailureRecord) + Send + Sync>;

struct Slots {
    uncaught_exception: FailureHandler,
    unhandled_rejection: FailureHandler,
}

/// Two named handler slots with a terminating default
pub struct FailureBridge {
    sink: Arc<dyn DiagnosticSink>,
    exit: Arc<dyn HostExit>,
    slots: RwLock<Slots>,
}

impl FailureBridge {
    pub fn new(sink: Arc<dyn DiagnosticSink>, exit: Arc<dyn HostExit>) -> Self {
        let terminal = terminal_handler(sink.clone(), exit.clone());
        Self {
            sink,
            exit,
            slots: RwLock::new(Slots {
                uncaught_exception: terminal.clone(),
                unhandled_rejection: terminal,
            }),
        }
    }

    /// Writes to stderr and exits the process
    pub fn with_process_defaults() -> Self {
        Self::new(Arc::new(StderrSink), Arc::new(ProcessExit))
    }

    /// The default policy: diagnostic first, then exit(1)
    pub fn terminal_handler(&self) -> FailureHandler {
        terminal_handler(self.sink.clone(), self.exit.clone())
    }

    pub fn handler(&self, kind: FailureKind) -> FailureHandler {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        match kind {
            FailureKind::UncaughtException => slots.uncaught_exception.clone(),
            FailureKind::UnhandledRejection => slots.unhandled_rejection.clone(),
        }
    }

    pub fn set_handler(&self, kind: FailureKind, handler: FailureHandler) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        match kind {
            FailureKind::UncaughtException => slots.uncaught_exception = handler,
            FailureKind::UnhandledRejection => slots.unhandled_rejection = handler,
        }
        debug!(kind = kind.label(), "replaced failure handler");
    }

    pub fn set_uncaught_exception_handler(&self, handler: FailureHandler) {
        self.set_handler(FailureKind::UncaughtException, handler);
    }

    pub fn set_unhandled_rejection_handler(&self, handler: FailureHandler) {
        self.set_handler(FailureKind::UnhandledRejection, handler);
    }

    /// Put the terminal handler back in both slots
    pub fn reset(&self) {
        let terminal = self.terminal_handler();
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.uncaught_exception = terminal.clone();
        slots.unhandled_rejection = terminal;
    }

    /// Route a record to the handler for its kind
    pub fn report(&self, record: &FailureRecord) {
        warn!(
            kind = record.kind.label(),
            error_type = %record.type_name,
            message = %record.message,
            "script failure reached the host"
        );
        // The slot lock is released before the handler runs, so a handler
        // may replace handlers.
        let handler = self.handler(record.kind);
        handler(record);
    }

    pub fn uncaught_exception(&self, py: Python<'_>, err: &PyErr) {
        self.report(&FailureRecord::from_pyerr(
            py,
            FailureKind::UncaughtException,
            err,
        ));
    }

    pub fn unhandled_rejection(&self, py: Python<'_>, err: &PyErr) {
        self.report(&FailureRecord::from_pyerr(
            py,
            FailureKind::UnhandledRejection,
            err,
        ));
    }
}

fn terminal_handler(sink: Arc<dyn DiagnosticSink>, exit: Arc<dyn HostExit>) -> FailureHandler {
    Arc::new(move |record: &FailureRecord| {
        sink.write_failure(record);
        exit.exit(EXIT_FAILURE);
    })
}

/// Wrap a script callable as a handler. The callable receives the original
/// error object (or the message when there is none). If it raises, the
/// error is printed and the terminal policy applies to the original failure.
fn script_handler(callback: Py<PyAny>, fallback: FailureHandler) -> FailureHandler {
    Arc::new(move |record: &FailureRecord| {
        let failed = Python::attach(|py| {
            let arg = match &record.error {
                Some(error) => error.clone_ref(py),
                None => match record.message.clone().into_pyobject(py) {
                    Ok(message) => message.into_any().unbind(),
                    Err(_) => py.None(),
                },
            };
            match callback.call1(py, (arg,)) {
                Ok(_) => false,
                Err(e) => {
                    eprintln!("Error in {} handler:", record.kind.label());
                    e.print(py);
                    true
                }
            }
        });
        if failed {
            fallback(record);
        }
    })
}

/// The `failure_hooks` global: invoke or replace the two handlers from script code
#[pyclass(frozen, module = "script_host")]
pub struct FailureHooks {
    bridge: Arc<FailureBridge>,
}

impl FailureHooks {
    pub fn new(bridge: Arc<FailureBridge>) -> Self {
        Self { bridge }
    }
}

#[pymethods]
impl FailureHooks {
    fn uncaught_exception(&self, py: Python<'_>, error: &Bound<'_, PyAny>) {
        self.bridge.report(&FailureRecord::from_value(
            py,
            FailureKind::UncaughtException,
            error,
        ));
    }

    fn unhandled_rejection(&self, py: Python<'_>, error: &Bound<'_, PyAny>) {
        self.bridge.report(&FailureRecord::from_value(
            py,
            FailureKind::UnhandledRejection,
            error,
        ));
    }

    /// Replace either or both handlers with script callables
    #[pyo3(signature = (uncaught_exception=None, unhandled_rejection=None))]
    fn replace(
        &self,
        uncaught_exception: Option<Py<PyAny>>,
        unhandled_rejection: Option<Py<PyAny>>,
    ) {
        if let Some(callback) = uncaught_exception {
            let handler = script_handler(callback, self.bridge.terminal_handler());
            self.bridge.set_uncaught_exception_handler(handler);
        }
        if let Some(callback) = unhandled_rejection {
            let handler = script_handler(callback, self.bridge.terminal_handler());
            self.bridge.set_unhandled_rejection_handler(handler);
        }
    }

    fn reset(&self) {
        self.bridge.reset();
    }
}

/// Exception handler installed on the event loop: `handler(loop, context)`
#[pyclass(frozen, module = "script_host")]
pub struct RejectionRelay {
    bridge: Arc<FailureBridge>,
}

impl RejectionRelay {
    pub fn new(bridge: Arc<FailureBridge>) -> Self {
        Self { bridge }
    }
}

#[pymethods]
impl RejectionRelay {
    fn __call__(
        &self,
        py: Python<'_>,
        _event_loop: &Bound<'_, PyAny>,
        context: &Bound<'_, PyDict>,
    ) -> PyResult<()> {
        let record = match context.get_item("exception")? {
            Some(exception) => {
                FailureRecord::from_value(py, FailureKind::UnhandledRejection, &exception)
            }
            None => {
                let message = match context.get_item("message")? {
                    Some(message) => message.str()?.to_string(),
                    None => "unhandled error in event loop".to_string(),
                };
                FailureRecord::from_message(FailureKind::UnhandledRejection, message)
            }
        };
        self.bridge.report(&record);
        Ok(())
    }
}
