//! Event-loop binding.
//!
//! A [`LoopEngine`] supplies two things: a factory producing the loop and a
//! flat table of loop primitives. Binding runs the factory, publishes the
//! table onto the global namespace and hands the [`LoopHandle`] back to the
//! entry point, which owns it from then on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pyo3::exceptions::PyException;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyTuple};
use tracing::{info, trace};

use super::bridge::{FailureBridge, RejectionRelay};
use super::namespace::GlobalNamespace;
use crate::error::Result;

pub trait LoopEngine {
    /// Create the loop. Takes nothing, returns the handle the host will own.
    fn make_loop(&self, py: Python<'_>) -> PyResult<LoopHandle>;

    /// The primitives published as globals, by name
    fn method_table<'py>(
        &self,
        py: Python<'py>,
        handle: &LoopHandle,
    ) -> PyResult<Vec<(String, Bound<'py, PyAny>)>>;
}

/// Default engine: an `asyncio` loop plus the host's timer primitives
pub struct AsyncioEngine;

impl LoopEngine for AsyncioEngine {
    /// A fresh loop, made current for this thread so `asyncio.ensure_future`
    /// and friends in script code land on it. Every task it creates reports
    /// its failure through the loop's exception handler.
    fn make_loop(&self, py: Python<'_>) -> PyResult<LoopHandle> {
        let asyncio = py.import("asyncio")?;
        let event_loop = asyncio.call_method0("new_event_loop")?;
        event_loop.call_method1("set_task_factory", (Bound::new(py, TaskFactory)?,))?;
        asyncio.call_method1("set_event_loop", (&event_loop,))?;

        let mut handle = LoopHandle::new(py, &event_loop)?;
        handle.current = true;
        Ok(handle)
    }

    fn method_table<'py>(
        &self,
        py: Python<'py>,
        handle: &LoopHandle,
    ) -> PyResult<Vec<(String, Bound<'py, PyAny>)>> {
        let timers = handle.timers(py);
        ["set_timeout", "clear_timeout", "set_interval", "clear_interval"]
            .into_iter()
            .map(|name| Ok((name.to_string(), timers.getattr(name)?)))
            .collect()
    }
}

#[derive(Default)]
struct TimerState {
    next_id: u64,
    pending: HashMap<u64, Py<PyAny>>,
    /// Future resolved when `pending` drains, while `run_until_idle` waits on it
    idle: Option<Py<PyAny>>,
}

struct TimerShared {
    event_loop: Py<PyAny>,
    state: Mutex<TimerState>,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        state.next_id
    }

    fn schedule(&self, py: Python<'_>, callback: TimerCallback, delay: f64) -> PyResult<()> {
        let id = callback.id;
        let callback = Bound::new(py, callback)?;
        let handle = self
            .event_loop
            .bind(py)
            .call_method1("call_later", (delay, callback))?;
        self.lock().pending.insert(id, handle.unbind());
        trace!(id, delay, "timer scheduled");
        Ok(())
    }

    fn is_pending(&self, id: u64) -> bool {
        self.lock().pending.contains_key(&id)
    }

    /// A one-shot timer ran
    fn finish(&self, py: Python<'_>, id: u64) -> PyResult<()> {
        self.lock().pending.remove(&id);
        self.notify_if_idle(py)
    }

    fn cancel(&self, py: Python<'_>, id: u64) -> PyResult<()> {
        let handle = self.lock().pending.remove(&id);
        if let Some(handle) = handle {
            handle.call_method0(py, "cancel")?;
            trace!(id, "timer cancelled");
        }
        self.notify_if_idle(py)
    }

    fn cancel_all(&self, py: Python<'_>) -> PyResult<()> {
        let pending: Vec<_> = self.lock().pending.drain().collect();
        for (_, handle) in pending {
            handle.call_method0(py, "cancel")?;
        }
        self.notify_if_idle(py)
    }

    fn notify_if_idle(&self, py: Python<'_>) -> PyResult<()> {
        let waiter = {
            let mut state = self.lock();
            if state.pending.is_empty() {
                state.idle.take()
            } else {
                None
            }
        };
        if let Some(waiter) = waiter {
            let waiter = waiter.bind(py);
            if !waiter.call_method0("done")?.is_truthy()? {
                waiter.call_method1("set_result", (py.None(),))?;
            }
        }
        Ok(())
    }
}

/// Milliseconds from script code to loop seconds. Anything that is not a
/// positive finite number means "as soon as possible".
fn delay_seconds(delay_ms: f64) -> f64 {
    if delay_ms.is_finite() && delay_ms > 0.0 {
        delay_ms / 1000.0
    } else {
        0.0
    }
}

/// Timer primitives bound to one loop
#[pyclass(frozen, module = "script_host")]
pub struct Timers {
    shared: Arc<TimerShared>,
}

impl Timers {
    fn start(
        &self,
        py: Python<'_>,
        callback: Py<PyAny>,
        delay_ms: f64,
        args: Py<PyTuple>,
        repeat: bool,
    ) -> PyResult<u64> {
        let delay = delay_seconds(delay_ms);
        let id = self.shared.allocate_id();
        let timer = TimerCallback {
            shared: self.shared.clone(),
            id,
            callback,
            args,
            interval: repeat.then_some(delay),
        };
        self.shared.schedule(py, timer, delay)?;
        Ok(id)
    }

    /// Unknown or malformed ids are ignored
    fn clear(&self, py: Python<'_>, id: &Bound<'_, PyAny>) -> PyResult<()> {
        // bool is an int subclass, but `True` is not timer 1
        if id.is_instance_of::<PyBool>() {
            return Ok(());
        }
        match id.extract::<u64>() {
            Ok(id) => self.shared.cancel(py, id),
            Err(_) => Ok(()),
        }
    }
}

#[pymethods]
impl Timers {
    #[pyo3(signature = (callback, delay_ms=0.0, *args))]
    fn set_timeout(
        &self,
        py: Python<'_>,
        callback: Py<PyAny>,
        delay_ms: f64,
        args: &Bound<'_, PyTuple>,
    ) -> PyResult<u64> {
        self.start(py, callback, delay_ms, args.clone().unbind(), false)
    }

    fn clear_timeout(&self, py: Python<'_>, id: &Bound<'_, PyAny>) -> PyResult<()> {
        self.clear(py, id)
    }

    #[pyo3(signature = (callback, delay_ms=0.0, *args))]
    fn set_interval(
        &self,
        py: Python<'_>,
        callback: Py<PyAny>,
        delay_ms: f64,
        args: &Bound<'_, PyTuple>,
    ) -> PyResult<u64> {
        self.start(py, callback, delay_ms, args.clone().unbind(), true)
    }

    fn clear_interval(&self, py: Python<'_>, id: &Bound<'_, PyAny>) -> PyResult<()> {
        self.clear(py, id)
    }

    /// Number of timers that have not fired or been cleared
    fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

/// What the loop actually calls when a timer comes due
#[pyclass(frozen)]
struct TimerCallback {
    shared: Arc<TimerShared>,
    id: u64,
    callback: Py<PyAny>,
    args: Py<PyTuple>,
    interval: Option<f64>,
}

#[pymethods]
impl TimerCallback {
    fn __call__(&self, py: Python<'_>) -> PyResult<()> {
        match self.interval {
            Some(delay) => {
                if !self.shared.is_pending(self.id) {
                    return Ok(());
                }
                let next = TimerCallback {
                    shared: self.shared.clone(),
                    id: self.id,
                    callback: self.callback.clone_ref(py),
                    args: self.args.clone_ref(py),
                    interval: self.interval,
                };
                self.shared.schedule(py, next, delay)?;
                self.callback.bind(py).call1(self.args.bind(py))?;
                Ok(())
            }
            None => {
                // Errors propagate to the loop's exception handler, but the
                // timer is finished either way.
                let result = self.callback.bind(py).call1(self.args.bind(py));
                self.shared.finish(py, self.id)?;
                result.map(drop)
            }
        }
    }
}

/// Task factory installed on the host loop: builds a plain `asyncio.Task`
/// and watches it with a [`TaskReporter`]
#[pyclass(frozen, module = "script_host")]
struct TaskFactory;

#[pymethods]
impl TaskFactory {
    #[pyo3(signature = (event_loop, coro, **kwargs))]
    fn __call__<'py>(
        &self,
        py: Python<'py>,
        event_loop: &Bound<'py, PyAny>,
        coro: &Bound<'py, PyAny>,
        kwargs: Option<&Bound<'py, PyDict>>,
    ) -> PyResult<Bound<'py, PyAny>> {
        let options = PyDict::new(py);
        if let Some(kwargs) = kwargs {
            options.update(kwargs.as_mapping())?;
        }
        options.set_item("loop", event_loop)?;
        let task = py
            .import("asyncio")?
            .getattr("Task")?
            .call((coro,), Some(&options))?;
        task.call_method1("add_done_callback", (Bound::new(py, TaskReporter)?,))?;
        Ok(task)
    }
}

/// Done callback that hands a failed task's exception to the loop's
/// exception handler
#[pyclass(frozen, module = "script_host")]
struct TaskReporter;

#[pymethods]
impl TaskReporter {
    fn __call__(&self, py: Python<'_>, task: &Bound<'_, PyAny>) -> PyResult<()> {
        if task.call_method0("cancelled")?.is_truthy()? {
            return Ok(());
        }
        // Retrieving the exception also keeps asyncio from logging it again
        let exception = task.call_method0("exception")?;
        // SystemExit and KeyboardInterrupt already escaped the loop run
        if exception.is_none() || !exception.is_instance_of::<PyException>() {
            return Ok(());
        }
        let context = PyDict::new(py);
        context.set_item("message", "Task exception was never retrieved")?;
        context.set_item("exception", exception)?;
        context.set_item("task", task)?;
        task.call_method0("get_loop")?
            .call_method1("call_exception_handler", (context,))?;
        Ok(())
    }
}

/// Lifecycle controller for the installed loop
pub struct LoopHandle {
    event_loop: Py<PyAny>,
    timers: Py<Timers>,
    published: Vec<String>,
    /// The loop was made the thread's current loop and must be unset on close
    current: bool,
}

impl LoopHandle {
    /// Wrap an `asyncio`-compatible loop object
    pub fn new(py: Python<'_>, event_loop: &Bound<'_, PyAny>) -> PyResult<Self> {
        let shared = Arc::new(TimerShared {
            event_loop: event_loop.clone().unbind(),
            state: Mutex::new(TimerState::default()),
        });
        Ok(Self {
            event_loop: event_loop.clone().unbind(),
            timers: Py::new(py, Timers { shared })?,
            published: Vec::new(),
            current: false,
        })
    }

    /// Names the binder wrote onto the global namespace
    pub fn published_globals(&self) -> &[String] {
        &self.published
    }

    pub fn event_loop<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.event_loop.bind(py)
    }

    pub fn timers<'py>(&self, py: Python<'py>) -> &Bound<'py, Timers> {
        self.timers.bind(py)
    }

    pub fn pending(&self) -> usize {
        self.timers.get().shared.lock().pending.len()
    }

    pub fn set_exception_handler(
        &self,
        py: Python<'_>,
        handler: &Bound<'_, PyAny>,
    ) -> PyResult<()> {
        self.event_loop(py)
            .call_method1("set_exception_handler", (handler,))?;
        Ok(())
    }

    /// Tasks on this loop that have not finished
    pub fn pending_tasks<'py>(&self, py: Python<'py>) -> PyResult<Bound<'py, PyAny>> {
        py.import("asyncio")?
            .call_method1("all_tasks", (self.event_loop(py),))
    }

    /// Run the loop until no timer is pending and every task has finished.
    ///
    /// Timers and tasks can start each other, so the two are drained in turn
    /// until both are empty at the same time.
    pub fn run_until_idle(&self, py: Python<'_>) -> PyResult<()> {
        let shared = &self.timers.get().shared;
        let event_loop = self.event_loop(py);
        loop {
            if !shared.lock().pending.is_empty() {
                let waiter = event_loop.call_method0("create_future")?;
                shared.lock().idle = Some(waiter.clone().unbind());
                event_loop.call_method1("run_until_complete", (waiter,))?;
            }

            let tasks = self.pending_tasks(py)?;
            if tasks.len()? == 0 {
                if shared.lock().pending.is_empty() {
                    return Ok(());
                }
                continue;
            }
            trace!(tasks = tasks.len()?, "waiting for tasks");
            let wait = py.import("asyncio")?.call_method1("wait", (tasks,))?;
            event_loop.call_method1("run_until_complete", (wait,))?;
        }
    }

    /// Cancel every pending timer
    pub fn stop(&self, py: Python<'_>) -> PyResult<()> {
        self.timers.get().shared.cancel_all(py)
    }

    pub fn close(self, py: Python<'_>) -> PyResult<()> {
        self.stop(py)?;
        let event_loop = self.event_loop(py);
        if !event_loop.call_method0("is_closed")?.is_truthy()? {
            event_loop.call_method0("close")?;
        }
        if self.current {
            py.import("asyncio")?
                .call_method1("set_event_loop", (py.None(),))?;
        }
        Ok(())
    }
}

/// Build the loop, publish its primitives and route loop failures to the
/// unhandled-rejection hook.
///
/// Publishing is all-or-nothing: the factory runs, the exception handler is
/// installed and the whole method table is staged before any global is
/// written. Any failure closes the loop and leaves the namespace untouched.
pub fn bind_event_loop(
    py: Python<'_>,
    engine: &dyn LoopEngine,
    namespace: &GlobalNamespace,
    bridge: &Arc<FailureBridge>,
) -> Result<LoopHandle> {
    let mut handle = engine.make_loop(py)?;

    let methods = match engine.method_table(py, &handle) {
        Ok(methods) => methods,
        Err(e) => {
            let _ = handle.close(py);
            return Err(e.into());
        }
    };
    let relay = Bound::new(py, RejectionRelay::new(bridge.clone()))
        .and_then(|relay| handle.set_exception_handler(py, relay.as_any()));
    if let Err(e) = relay {
        let _ = handle.close(py);
        return Err(e.into());
    }
    if let Err(e) = namespace.publish_all(py, &methods) {
        let _ = handle.close(py);
        return Err(e);
    }

    handle.published = methods.into_iter().map(|(name, _)| name).collect();
    info!(methods = ?handle.published, "event loop installed");
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootstrapError;
    use crate::testing::{Event, Recorder, exec_in};
    use pyo3::exceptions::PyRuntimeError;
    use std::ffi::CString;

    fn installed(py: Python<'_>) -> (GlobalNamespace, LoopHandle, Recorder) {
        let ns = GlobalNamespace::new(py).unwrap();
        let recorder = Recorder::new();
        let handle = bind_event_loop(py, &AsyncioEngine, &ns, &recorder.bridge()).unwrap();
        (ns, handle, recorder)
    }

    fn list_of(globals: &Bound<'_, PyDict>, name: &str) -> Vec<String> {
        globals.get_item(name).unwrap().unwrap().extract().unwrap()
    }

    struct FailingEngine;

    impl LoopEngine for FailingEngine {
        fn make_loop(&self, _py: Python<'_>) -> PyResult<LoopHandle> {
            Err(PyRuntimeError::new_err("no loop for you"))
        }

        fn method_table<'py>(
            &self,
            _py: Python<'py>,
            _handle: &LoopHandle,
        ) -> PyResult<Vec<(String, Bound<'py, PyAny>)>> {
            unreachable!("factory failed first")
        }
    }

    /// Publishes whatever callables it was built with
    struct TableEngine(Vec<(String, Py<PyAny>)>);

    impl LoopEngine for TableEngine {
        fn make_loop(&self, py: Python<'_>) -> PyResult<LoopHandle> {
            AsyncioEngine.make_loop(py)
        }

        fn method_table<'py>(
            &self,
            py: Python<'py>,
            _handle: &LoopHandle,
        ) -> PyResult<Vec<(String, Bound<'py, PyAny>)>> {
            Ok(self
                .0
                .iter()
                .map(|(name, f)| (name.clone(), f.bind(py).clone()))
                .collect())
        }
    }

    fn lambda(py: Python<'_>, source: &str) -> Py<PyAny> {
        let code = CString::new(source).unwrap();
        py.eval(code.as_c_str(), None, None).unwrap().unbind()
    }

    #[test]
    fn test_method_table_is_published_by_identity() {
        Python::attach(|py| {
            let ns = GlobalNamespace::new(py).unwrap();
            let schedule = lambda(py, "lambda cb: cb()");
            let engine = TableEngine(vec![("schedule".into(), schedule.clone_ref(py))]);

            let handle = bind_event_loop(py, &engine, &ns, &Recorder::new().bridge()).unwrap();

            assert!(ns.get(py, "schedule").unwrap().unwrap().is(schedule.bind(py)));
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_factory_failure_writes_no_globals() {
        Python::attach(|py| {
            let ns = GlobalNamespace::new(py).unwrap();
            let before = ns.bind(py).len();

            let err = bind_event_loop(py, &FailingEngine, &ns, &Recorder::new().bridge())
                .err()
                .unwrap();

            assert!(err.to_string().contains("no loop for you"));
            assert_eq!(ns.bind(py).len(), before);
        });
    }

    #[test]
    fn test_colliding_table_publishes_nothing() {
        Python::attach(|py| {
            let ns = GlobalNamespace::new(py).unwrap();
            let engine = TableEngine(vec![
                ("fresh_name".into(), lambda(py, "lambda: 1")),
                ("len".into(), lambda(py, "lambda: 2")),
            ]);

            let err = bind_event_loop(py, &engine, &ns, &Recorder::new().bridge())
                .err()
                .unwrap();

            assert!(matches!(err, BootstrapError::DuplicateGlobal(name) if name == "len"));
            assert!(!ns.contains(py, "fresh_name").unwrap());
        });
    }

    #[test]
    fn test_timeouts_fire_in_delay_order() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(
                py,
                &ns,
                "order = []\n\
                 set_timeout(order.append, 20, 'late')\n\
                 set_timeout(order.append, 0, 'early')\n",
            );

            assert_eq!(handle.pending(), 2);
            handle.run_until_idle(py).unwrap();

            assert_eq!(list_of(&globals, "order"), vec!["early", "late"]);
            assert_eq!(handle.pending(), 0);
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_cleared_timeout_never_fires() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(
                py,
                &ns,
                "order = []\n\
                 doomed = set_timeout(order.append, 5, 'doomed')\n\
                 set_timeout(order.append, 10, 'kept')\n\
                 clear_timeout(doomed)\n\
                 clear_timeout(9999)\n\
                 clear_timeout('not an id')\n",
            );

            handle.run_until_idle(py).unwrap();
            assert_eq!(list_of(&globals, "order"), vec!["kept"]);
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_interval_repeats_until_cleared() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(
                py,
                &ns,
                "ticks = []\n\
                 def tick():\n\
                 \x20   ticks.append(str(len(ticks)))\n\
                 \x20   if len(ticks) == 3:\n\
                 \x20       clear_interval(timer)\n\
                 timer = set_interval(tick, 1)\n",
            );

            handle.run_until_idle(py).unwrap();
            assert_eq!(list_of(&globals, "ticks"), vec!["0", "1", "2"]);
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_run_until_idle_without_timers_returns() {
        Python::attach(|py| {
            let (_, handle, _) = installed(py);
            handle.run_until_idle(py).unwrap();
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_stop_cancels_pending_timers() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(py, &ns, "order = []\nset_timeout(order.append, 0, 'x')\n");

            handle.stop(py).unwrap();
            handle.run_until_idle(py).unwrap();

            assert!(list_of(&globals, "order").is_empty());
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_failing_timer_reaches_rejection_hook() {
        Python::attach(|py| {
            let (ns, handle, recorder) = installed(py);
            exec_in(
                py,
                &ns,
                "def explode():\n    raise ValueError('timer boom')\nset_timeout(explode)\n",
            );

            handle.run_until_idle(py).unwrap();

            let events = recorder.events();
            assert_eq!(events.len(), 2);
            assert!(matches!(&events[0], Event::Diagnostic(text) if text.contains("timer boom")));
            assert_eq!(events[1], Event::Exit(1));
            assert_eq!(handle.pending(), 0);
            handle.close(py).unwrap();
        });
    }

    /// Loop object with just enough surface for `LoopHandle::close`
    struct BareEngine(Py<PyAny>);

    impl LoopEngine for BareEngine {
        fn make_loop(&self, py: Python<'_>) -> PyResult<LoopHandle> {
            LoopHandle::new(py, self.0.bind(py))
        }

        fn method_table<'py>(
            &self,
            py: Python<'py>,
            _handle: &LoopHandle,
        ) -> PyResult<Vec<(String, Bound<'py, PyAny>)>> {
            Ok(vec![("fresh_name".into(), lambda(py, "lambda: 1").into_bound(py))])
        }
    }

    #[test]
    fn test_handler_install_failure_publishes_nothing_and_closes() {
        Python::attach(|py| {
            let globals = PyDict::new(py);
            let code = CString::new(
                "class BareLoop:\n\
                 \x20   closed = False\n\
                 \x20   def is_closed(self):\n\
                 \x20       return self.closed\n\
                 \x20   def close(self):\n\
                 \x20       self.closed = True\n\
                 bare = BareLoop()\n",
            )
            .unwrap();
            py.run(code.as_c_str(), Some(&globals), None).unwrap();
            let bare = globals.get_item("bare").unwrap().unwrap();
            let ns = GlobalNamespace::new(py).unwrap();

            let result = bind_event_loop(
                py,
                &BareEngine(bare.clone().unbind()),
                &ns,
                &Recorder::new().bridge(),
            );

            assert!(result.is_err());
            assert!(!ns.contains(py, "fresh_name").unwrap());
            let closed: bool = bare.getattr("closed").unwrap().extract().unwrap();
            assert!(closed);
        });
    }

    #[test]
    fn test_clear_ignores_booleans() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(
                py,
                &ns,
                "order = []\n\
                 set_timeout(order.append, 5, 'first')\n\
                 clear_timeout(True)\n\
                 clear_interval(True)\n",
            );

            handle.run_until_idle(py).unwrap();
            assert_eq!(list_of(&globals, "order"), vec!["first"]);
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_loop_is_current_for_script_code() {
        Python::attach(|py| {
            let (ns, handle, _) = installed(py);
            let globals = exec_in(py, &ns, "import asyncio\ncurrent = asyncio.get_event_loop()\n");

            let current = globals.get_item("current").unwrap().unwrap();
            assert!(current.is(handle.event_loop(py)));
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_failing_task_reaches_rejection_hook() {
        Python::attach(|py| {
            let (ns, handle, recorder) = installed(py);
            exec_in(
                py,
                &ns,
                "import asyncio\n\
                 async def explode():\n\
                 \x20   raise ValueError('task boom')\n\
                 asyncio.ensure_future(explode())\n",
            );

            handle.run_until_idle(py).unwrap();

            let events = recorder.events();
            assert_eq!(events.len(), 2, "{events:?}");
            assert!(matches!(&events[0], Event::Diagnostic(text) if text.contains("task boom")));
            assert_eq!(events[1], Event::Exit(1));
            assert_eq!(handle.pending_tasks(py).unwrap().len().unwrap(), 0);
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_drain_waits_for_tasks_started_by_timers() {
        Python::attach(|py| {
            let (ns, handle, recorder) = installed(py);
            let globals = exec_in(
                py,
                &ns,
                "import asyncio\n\
                 done = []\n\
                 async def work():\n\
                 \x20   await asyncio.sleep(0.02)\n\
                 \x20   done.append('task')\n\
                 \x20   set_timeout(done.append, 1, 'timer')\n\
                 set_timeout(lambda: asyncio.ensure_future(work()), 1)\n",
            );

            handle.run_until_idle(py).unwrap();

            assert_eq!(list_of(&globals, "done"), vec!["task", "timer"]);
            assert!(recorder.events().is_empty());
            handle.close(py).unwrap();
        });
    }

    #[test]
    fn test_delay_conversion() {
        assert_eq!(delay_seconds(1500.0), 1.5);
        assert_eq!(delay_seconds(-5.0), 0.0);
        assert_eq!(delay_seconds(f64::NAN), 0.0);
        assert_eq!(delay_seconds(f64::INFINITY), 0.0);
    }
}
