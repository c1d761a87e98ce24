//! File logging for the deck engine, driven by the `[logging]` config section.
//!
//! # Responsibility
//! - Start one rolling file logger per process from [`LoggingConfig`].
//! - Record panics as single-line `event=panic_captured` entries and flush
//!   them before the previous hook runs.
//!
//! # Invariants
//! - Deck records never carry note, comment or quote text; panic payloads are
//!   capped at `panic_payload_chars` and omitted when that is zero.
//! - Repeating init with identical settings is a no-op; any different
//!   setting is rejected while a logger is active.
//! - Init never panics.

use crate::config::LoggingConfig;
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

const LOG_FILE_BASENAME: &str = "lessondeck";
const BYTES_PER_MB: u64 = 1024 * 1024;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

/// Settings of the running logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: &'static str,
    pub dir: PathBuf,
    pub max_file_bytes: u64,
    pub keep_files: usize,
    pub panic_payload_chars: usize,
}

#[derive(Debug)]
pub enum LoggingError {
    InvalidLevel(String),
    InvalidDir(String),
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    Backend(String),
    /// A logger with other settings is already running.
    Conflict {
        active: LoggingStatus,
        requested: LoggingStatus,
    },
}

impl Display for LoggingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidLevel(level) => write!(
                f,
                "unsupported log level `{level}`; expected trace|debug|info|warn|error"
            ),
            Self::InvalidDir(reason) => write!(f, "invalid log directory: {reason}"),
            Self::CreateDir { dir, source } => {
                write!(f, "failed to create log directory `{}`: {source}", dir.display())
            }
            Self::Backend(message) => write!(f, "failed to start logger: {message}"),
            Self::Conflict { active, requested } => write!(
                f,
                "logging already active (level={} dir={}); refusing level={} dir={}",
                active.level,
                active.dir.display(),
                requested.level,
                requested.dir.display()
            ),
        }
    }
}

impl Error for LoggingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CreateDir { source, .. } => Some(source),
            _ => None,
        }
    }
}

struct ActiveLogger {
    status: LoggingStatus,
    handle: LoggerHandle,
}

/// Starts file logging from `config`.
///
/// Returns `Ok(None)` without touching the logger when `config.dir` is unset,
/// and the active settings otherwise.
///
/// # Errors
/// - Unknown level, relative or empty directory.
/// - The directory cannot be created or the backend fails to start.
/// - A logger with different settings is already active.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<LoggingStatus>, LoggingError> {
    let Some(dir) = config.dir.as_deref() else {
        return Ok(None);
    };
    let requested = LoggingStatus {
        level: parse_level(&config.level)?,
        dir: absolute_dir(dir)?,
        max_file_bytes: config.max_file_mb.max(1).saturating_mul(BYTES_PER_MB),
        keep_files: config.keep_files.max(1),
        panic_payload_chars: config.panic_payload_chars,
    };

    let active = ACTIVE.get_or_try_init(|| start_logger(&requested))?;
    if active.status != requested {
        return Err(LoggingError::Conflict {
            active: active.status.clone(),
            requested,
        });
    }
    Ok(Some(requested))
}

pub fn logging_status() -> Option<LoggingStatus> {
    ACTIVE.get().map(|active| active.status.clone())
}

/// Canonical `log` level name for a config value.
pub fn parse_level(level: &str) -> Result<&'static str, LoggingError> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" => Ok("error"),
        other => Err(LoggingError::InvalidLevel(other.to_string())),
    }
}

fn absolute_dir(dir: &Path) -> Result<PathBuf, LoggingError> {
    if dir.as_os_str().is_empty() {
        return Err(LoggingError::InvalidDir("path is empty".to_string()));
    }
    if !dir.is_absolute() {
        return Err(LoggingError::InvalidDir(format!(
            "`{}` is not absolute",
            dir.display()
        )));
    }
    Ok(dir.to_path_buf())
}

fn start_logger(status: &LoggingStatus) -> Result<ActiveLogger, LoggingError> {
    std::fs::create_dir_all(&status.dir).map_err(|source| LoggingError::CreateDir {
        dir: status.dir.clone(),
        source,
    })?;

    let handle = Logger::try_with_str(status.level)
        .map_err(|err| LoggingError::Backend(err.to_string()))?
        .log_to_file(
            FileSpec::default()
                .directory(status.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(status.max_file_bytes),
            Naming::Numbers,
            Cleanup::KeepLogFiles(status.keep_files),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        .format_for_files(flexi_logger::detailed_format)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    install_panic_hook_once();
    info!(
        "event=logging_init module=logging status=ok version={} level={} dir={} max_file_bytes={} keep_files={}",
        env!("CARGO_PKG_VERSION"),
        status.level,
        status.dir.display(),
        status.max_file_bytes,
        status.keep_files
    );

    Ok(ActiveLogger {
        status: status.clone(),
        handle,
    })
}

fn install_panic_hook_once() {
    if PANIC_HOOK_INSTALLED.set(()).is_err() {
        return;
    }

    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if let Some(active) = ACTIVE.get() {
            let location = panic_info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();
            error!(
                "event=panic_captured module=logging status=error thread={} location={} payload={}",
                thread.name().unwrap_or("unnamed"),
                location,
                redact_payload(
                    panic_payload(panic_info),
                    active.status.panic_payload_chars
                )
            );
            active.handle.flush();
        }
        previous_hook(panic_info);
    }));
}

fn panic_payload<'a>(info: &'a std::panic::PanicHookInfo<'_>) -> &'a str {
    if let Some(message) = info.payload().downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = info.payload().downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// One line, at most `max_chars` characters. Panics raised over deck content
/// may quote note text, so zero drops the payload entirely.
fn redact_payload(payload: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return "omitted".to_string();
    }
    let single_line = payload.replace(['\n', '\r'], " ");
    let mut capped = single_line.chars().take(max_chars).collect::<String>();
    if single_line.chars().count() > max_chars {
        capped.push_str("...");
    }
    capped
}
