pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod repl;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use bootstrap::{PreloadsComplete, ScriptContext};
pub use error::{BootstrapError, Result};
