//! Tracing setup for Marquee
//!
//! Console output shows Marquee's own events at the level the user picked,
//! while dependencies (reqwest, hyper) stay at `warn`. The run log on disk
//! keeps Marquee's full trace so a failed install or resolution can be
//! replayed step by step.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Environment variable overriding the console filter; `RUST_LOG` is
/// consulted when it is unset.
pub const LOG_ENV: &str = "MARQUEE_LOG";

/// File name of the run log inside the logs directory.
pub const RUN_LOG_FILE: &str = "marquee-last-run.log";

const MARQUEE_TARGETS: [&str; 3] = ["marquee", "marquee_core", "marquee_cli"];

/// Initialize tracing with dual output: console (user level) + run log
///
/// # Arguments
/// * `console_level` - Level for Marquee's own console output
/// * `logs_dir` - Directory for the run log (defaults to "./logs")
///
/// The run log is overwritten on every start.
///
/// # Errors
///
/// - `std::io::Error` - If the logs directory or log file cannot be created
pub fn init_tracing(console_level: Level, logs_dir: Option<&Path>) -> std::io::Result<()> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(RUN_LOG_FILE);
    let log_file = File::create(&log_file_path)?;

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter(console_level));

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(EnvFilter::new(scoped_directives(Level::TRACE, Level::DEBUG)));

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!(
        "Tracing initialized: console={}, log_file={}",
        console_level,
        log_file_path.display()
    );

    Ok(())
}

fn console_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(scoped_directives(level, Level::WARN)))
}

/// Filter directives giving Marquee crates `own` and everything else
/// `dependencies`, whichever is quieter for dependencies.
fn scoped_directives(own: Level, dependencies: Level) -> String {
    // Level ordering: TRACE is the greatest
    let dependencies = dependencies.min(own);

    let mut directives = vec![dependencies.to_string().to_lowercase()];
    directives.extend(
        MARQUEE_TARGETS
            .iter()
            .map(|target| format!("{target}={}", own.to_string().to_lowercase())),
    );
    directives.join(",")
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    /// Only error messages
    Error,
    /// Warning and error messages
    Warn,
    /// Progress of installs and resolutions
    Info,
    /// Every provider attempt, cache hit and file operation
    Debug,
    /// All messages including detailed tracing
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use marquee_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}
