use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

/// Default file name for the REPL history, under the home directory
pub const HISTORY_FILE: &str = ".script_host_history";

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "script-host")]
#[command(about = "Run Python programs with timers, require() and terminal failure hooks")]
#[command(version)]
pub struct Cli {
    /// Load a module before the program (repeatable)
    #[arg(short = 'r', long = "require", value_name = "MODULE")]
    pub preloads: Vec<String>,

    /// Run a code snippet before the program (repeatable)
    #[arg(short = 'e', long = "eval", value_name = "CODE")]
    pub evals: Vec<String>,

    /// Start the REPL, after the program if one is given
    #[arg(short, long)]
    pub interactive: bool,

    /// Set log level (off, error, warn, info, debug, trace)
    #[arg(
        short = 'l',
        long,
        value_enum,
        env = "SCRIPT_HOST_LOG",
        default_value = "warn"
    )]
    pub log_level: LogLevel,

    /// Directory that preload ids resolve against (defaults to the current directory)
    #[arg(long, env = "SCRIPT_HOST_ANCHOR")]
    pub anchor: Option<PathBuf>,

    /// REPL history file (defaults to ~/.script_host_history)
    #[arg(long, env = "SCRIPT_HOST_HISTORY")]
    pub history: Option<PathBuf>,

    /// Program module to run
    pub program: Option<PathBuf>,

    /// Arguments passed to the program as `arguments`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Resolved start-up settings for one host run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub anchor: PathBuf,
    pub preloads: Vec<String>,
    pub evals: Vec<String>,
    pub interactive: bool,
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    pub history: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl HostConfig {
    pub fn from_cli(cli: Cli) -> std::io::Result<Self> {
        let anchor = match cli.anchor {
            Some(anchor) => anchor,
            None => std::env::current_dir()?,
        };
        let history = cli
            .history
            .or_else(|| home::home_dir().map(|home| home.join(HISTORY_FILE)));

        Ok(Self {
            anchor,
            preloads: cli.preloads,
            evals: cli.evals,
            interactive: cli.interactive,
            program: cli.program,
            args: cli.args,
            history,
            log_level: cli.log_level,
        })
    }

    /// The REPL runs when there is no program or when asked for explicitly
    pub fn wants_repl(&self) -> bool {
        self.program.is_none() || self.interactive
    }

    /// `arguments` as the program sees it: the program path, then its args
    pub fn argv(&self) -> Vec<String> {
        self.program
            .iter()
            .map(|program| program.to_string_lossy().into_owned())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Filter directive scoped to this crate's own spans and events
    pub fn env_filter(&self) -> String {
        format!("script_host={}", LevelFilter::from(self.log_level))
    }
}
