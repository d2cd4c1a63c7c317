//! Interpreter start-up, the host run sequence and the REPL wiring

use std::sync::Arc;

use pyo3::exceptions::PySystemExit;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use tracing::{debug, info};

use crate::bootstrap::ScriptContext;
use crate::bootstrap::bridge::{EXIT_FAILURE, FailureBridge};
use crate::bootstrap::event_loop::{AsyncioEngine, LoopHandle};
use crate::cli::HostConfig;
use crate::error::{BootstrapError, Result};
use crate::repl::{self, Flow};

/// Stage 1: bring up the bare interpreter
pub fn initialize_runtime() {
    Python::initialize();
}

/// The status a `SystemExit` asks for, or `None` for any other error
pub fn system_exit_status(py: Python<'_>, err: &PyErr) -> Option<i32> {
    if !err.is_instance_of::<PySystemExit>(py) {
        return None;
    }
    let Ok(code) = err.value(py).getattr("code") else {
        return Some(EXIT_FAILURE);
    };
    if code.is_none() {
        return Some(0);
    }
    if let Ok(status) = code.extract::<i32>() {
        return Some(status);
    }
    // Non-integer codes are printed, like the stock interpreter does
    if let Ok(text) = code.str() {
        eprintln!("{}", text.to_string_lossy());
    }
    Some(EXIT_FAILURE)
}

/// Turn the outcome of script code into an exit status, if it ends the run
fn settle(py: Python<'_>, ctx: &ScriptContext, result: Result<()>) -> Option<i32> {
    let err = result.err()?;
    if let BootstrapError::Python(e) = &err
        && let Some(status) = system_exit_status(py, e)
    {
        debug!(status, "script requested exit");
        return Some(status);
    }
    ctx.report_uncaught(py, err);
    Some(EXIT_FAILURE)
}

fn run_script_phase(
    py: Python<'_>,
    ctx: &ScriptContext,
    event_loop: &LoopHandle,
    config: &HostConfig,
) -> Result<()> {
    for id in &config.preloads {
        ctx.preload(py, id)?;
    }
    for code in &config.evals {
        ctx.eval_snippet(py, code)?;
    }
    let token = ctx.complete_preloads()?;

    if let Some(program) = &config.program {
        ctx.run_program(py, token, program)?;
        event_loop.run_until_idle(py)?;
    }
    Ok(())
}

/// Run the whole host sequence for `config` and return the process status.
///
/// Failures while building the context are returned as errors. Failures in
/// script code go through the bridge, whose default handlers exit the
/// process before this returns.
pub fn run_host(
    py: Python<'_>,
    config: &HostConfig,
    bridge: Arc<FailureBridge>,
) -> Result<i32> {
    let ctx = ScriptContext::initialize(py, &config.anchor, bridge)?;
    let event_loop = ctx.prepare_event_loop(py, &AsyncioEngine)?;

    let status = with_teardown(py, ctx, event_loop, |ctx, event_loop| {
        drive(py, ctx, event_loop, config)
    })?;
    info!(status, "host finished");
    Ok(status)
}

/// Run `body`, then tear the context down whatever `body` returned.
///
/// An error from `body` wins over a teardown error.
pub(crate) fn with_teardown<T>(
    py: Python<'_>,
    ctx: ScriptContext,
    event_loop: LoopHandle,
    body: impl FnOnce(&ScriptContext, &LoopHandle) -> Result<T>,
) -> Result<T> {
    let outcome = body(&ctx, &event_loop);
    let teardown = ctx.teardown(py, Some(event_loop));
    let value = outcome?;
    teardown?;
    Ok(value)
}

fn drive(
    py: Python<'_>,
    ctx: &ScriptContext,
    event_loop: &LoopHandle,
    config: &HostConfig,
) -> Result<i32> {
    let argv = ctx.make_argv_builder(py)?;
    argv.extend(py, config.argv())?;
    debug!(count = argv.len(py), "arguments published");

    let mut status = settle(py, ctx, run_script_phase(py, ctx, event_loop, config));

    if status.is_none() && config.wants_repl() {
        ctx.init_repl_libs(py)?;
        configure_repl(py, ctx, event_loop)?;
        let history = config.history.clone();
        status = py
            .detach(|| repl::run(history))
            .map_err(|e| BootstrapError::Repl(e.to_string()))?;
    }

    Ok(status.unwrap_or(0))
}

/// True when `code` is a complete statement, or broken beyond repair
pub fn statement_complete(py: Python<'_>, code: &str) -> bool {
    let result = py
        .import("codeop")
        .and_then(|codeop| codeop.getattr("compile_command"))
        .and_then(|compile_cmd| compile_cmd.call1((code,)));

    match result {
        Ok(obj) if obj.is_none() => false, // None = incomplete
        Ok(_) => true,                     // Code object = complete
        Err(_) => true,                    // Syntax error = let Python report it
    }
}

/// Run one REPL statement in `globals`, then give the loop a turn so timers
/// that are already due can fire.
///
/// Script errors are printed and do not end the session; `SystemExit` does.
pub fn execute_repl_code(
    py: Python<'_>,
    globals: &Bound<'_, PyDict>,
    event_loop: Option<&Bound<'_, PyAny>>,
    code: &str,
) -> PyResult<Flow> {
    let run = || -> PyResult<()> {
        let builtins = py.import("builtins")?;
        let compiled = builtins
            .getattr("compile")?
            .call1((code, "<stdin>", "single"))?;
        builtins.getattr("exec")?.call1((compiled, globals))?;
        if let Some(event_loop) = event_loop {
            let tick = py.import("asyncio")?.call_method1("sleep", (0,))?;
            event_loop.call_method1("run_until_complete", (tick,))?;
        }
        Ok(())
    };

    match run() {
        Ok(()) => Ok(Flow::Continue),
        Err(e) => match system_exit_status(py, &e) {
            Some(status) => Ok(Flow::Exit(status)),
            None => {
                e.print(py);
                Ok(Flow::Continue)
            }
        },
    }
}

/// Stage 2: register the statement checker and executor with the REPL.
///
/// Statements share one `__main__` dict for the whole session.
pub fn configure_repl(
    py: Python<'_>,
    ctx: &ScriptContext,
    event_loop: &LoopHandle,
) -> PyResult<()> {
    let globals = ctx.fresh_globals(py, "__main__", None)?.unbind();
    let event_loop = event_loop.event_loop(py).clone().unbind();

    repl::set_statement_checker(Box::new(|code: &str| {
        Python::attach(|py| statement_complete(py, code))
    }));

    repl::set_code_executor(Box::new(move |code: &str| {
        let flow = Python::attach(|py| {
            execute_repl_code(py, globals.bind(py), Some(event_loop.bind(py)), code)
        })?;
        Ok(flow)
    }));

    Ok(())
}
