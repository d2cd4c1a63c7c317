use anyhow::Result;
use clap::Parser;
use pyo3::prelude::*;
use std::sync::Arc;

use script_host::bootstrap::bridge::{FailureBridge, HostExit, ProcessExit};
use script_host::cli::{Cli, HostConfig};
use script_host::runtime;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = HostConfig::from_cli(cli)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(config.env_filter()))
        .init();

    runtime::initialize_runtime();

    let bridge = Arc::new(FailureBridge::with_process_defaults());
    let status = Python::attach(|py| runtime::run_host(py, &config, bridge))?;

    ProcessExit.exit(status);
    Ok(())
}
