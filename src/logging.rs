use crate::config::{ConfigResolver, DEBUG, LOG_LEVEL, NO_COLOR, WORKER_ENV};
use crate::error::{WorkerError, WorkerResult};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;
use uuid::Uuid;

/// File that always receives ERROR events, whatever the level
pub const ERROR_LOG: &str = "error.log";

/// Level names accepted in `LOG_LEVEL`, most to least severe
pub const LEVELS: [&str; 7] = ["error", "warn", "info", "http", "verbose", "debug", "silly"];

/// Pick the level name: a known `LOG_LEVEL`, else `debug` when the debug
/// flag is on, else `info`
#[must_use]
pub fn select_level(config: &ConfigResolver) -> &'static str {
    if let Some(requested) = config.get::<String>(LOG_LEVEL) {
        if let Some(level) = LEVELS.iter().copied().find(|level| *level == requested) {
            return level;
        }
    }
    if config.flag(DEBUG) {
        return "debug";
    }
    "info"
}

/// Map a level name onto a tracing filter
#[must_use]
pub fn level_filter(level: &str) -> LevelFilter {
    match level {
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "verbose" | "debug" => LevelFilter::DEBUG,
        "silly" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    }
}

/// What the exit path needs from the logging setup
#[derive(Debug)]
pub struct LogHandle {
    log_dir: PathBuf,
    files: Vec<File>,
}

impl LogHandle {
    /// A handle with no file sink, e.g. for tests
    #[must_use]
    pub fn detached(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            files: Vec::new(),
        }
    }

    /// Transient directory holding this run's log files
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Push buffered output to the file and console sinks
    ///
    /// # Errors
    ///
    /// Returns an error if syncing a log file or flushing stdout fails
    pub fn flush(&self) -> io::Result<()> {
        for file in &self.files {
            file.sync_all()?;
        }
        io::stdout().flush()
    }

    /// Announce where the logs are, then flush; the last thing before exit
    ///
    /// # Errors
    ///
    /// Returns an error if flushing fails
    pub fn close(&self) -> io::Result<()> {
        info!(context = "Logger", "Log files saved to {}", self.log_dir.display());
        self.flush()
    }
}

/// Install the global subscriber
///
/// Writes `{level}.log` and `error.log` into a fresh `{tmp}/{app_name}-{uuid}`
/// directory and, outside production, to the console as well.
///
/// # Errors
///
/// Returns an error if the log directory or files cannot be created, or a
/// global subscriber is already installed
pub fn init(config: &ConfigResolver, app_name: &str) -> WorkerResult<LogHandle> {
    let level = select_level(config);
    let no_color = config.contains(NO_COLOR);
    let production = config
        .get::<String>(WORKER_ENV)
        .is_some_and(|env| env == "production");

    let log_dir = std::env::temp_dir().join(format!(
        "{}-{}",
        app_name.to_lowercase(),
        Uuid::new_v4().simple()
    ));
    fs::create_dir_all(&log_dir)?;

    let level_file = File::create(log_dir.join(format!("{level}.log")))?;
    let mut files = vec![level_file.try_clone()?];

    // At level "error" the level file already is the error file
    let error_file = if level == "error" {
        None
    } else {
        let file = File::create(log_dir.join(ERROR_LOG))?;
        files.push(file.try_clone()?);
        Some(file)
    };

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(level_file));
    let error_layer = error_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
            .with_filter(LevelFilter::ERROR)
    });
    let console_layer = (!production).then(|| {
        fmt::layer()
            .with_ansi(!no_color)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::default().add_directive(level_filter(level).into()))
        .with(file_layer)
        .with(error_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| WorkerError::Logging(e.to_string()))?;

    info!(context = "main", "Log files saved to {}", log_dir.display());

    Ok(LogHandle { log_dir, files })
}
