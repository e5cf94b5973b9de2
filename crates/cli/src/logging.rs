//! Subscriber setup. Everything goes to stderr; stdout is reserved for
//! command output so that content can be piped.

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Checked before `RUST_LOG`.
pub const LOG_ENV: &str = "SHELF_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Trace,
}
impl Verbosity {
    /// `-q` wins over any number of `-v`.
    pub fn from_flags(verbose: u8, quiet: bool) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }
}

pub fn init(verbosity: Verbosity) {
    let layer = fmt::layer().with_writer(std::io::stderr).with_target(verbosity >= Verbosity::Verbose);
    let registry = tracing_subscriber::registry().with(filter(verbosity));
    match verbosity {
        Verbosity::Quiet | Verbosity::Normal => registry.with(layer.without_time().compact()).init(),
        Verbosity::Verbose | Verbosity::Trace => registry.with(layer.with_timer(fmt::time::uptime())).init(),
    }
}

/// `SHELF_LOG`, then `RUST_LOG`, then the flags. Unparseable directives
/// fall through to the next source.
fn filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var(LOG_ENV)
        && let Ok(filter) = EnvFilter::try_new(&directives)
    {
        return filter;
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(directives(verbosity))
}

/// Dependencies stay at `warn` unless asked for explicitly through the
/// environment.
fn directives(verbosity: Verbosity) -> String {
    let level = verbosity.level().as_str().to_lowercase();
    match verbosity {
        Verbosity::Quiet => level,
        _ => format!("warn,shelf={level},shelf_storage={level},shelf_config={level}"),
    }
}
