//! Test doubles shared by the unit tests

use std::ffi::CString;
use std::sync::{Arc, Mutex};

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::bootstrap::bridge::{DiagnosticSink, FailureBridge, FailureRecord, HostExit};
use crate::bootstrap::namespace::GlobalNamespace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Diagnostic(String),
    Exit(i32),
    Custom(String),
}

/// Records diagnostics and exit requests, in order, instead of acting on them
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn bridge(&self) -> Arc<FailureBridge> {
        Arc::new(FailureBridge::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        ))
    }
}

impl DiagnosticSink for Recorder {
    fn write_failure(&self, record: &FailureRecord) {
        self.push(Event::Diagnostic(record.to_string()));
    }
}

impl HostExit for Recorder {
    fn exit(&self, status: i32) {
        self.push(Event::Exit(status));
    }
}

/// Run `source` in fresh module globals backed by `namespace`
pub fn exec_in<'py>(
    py: Python<'py>,
    namespace: &GlobalNamespace,
    source: &str,
) -> Bound<'py, PyDict> {
    let globals = PyDict::new(py);
    namespace.attach_to(py, &globals).unwrap();
    let code = CString::new(source).unwrap();
    py.run(code.as_c_str(), Some(&globals), None).unwrap();
    globals
}
