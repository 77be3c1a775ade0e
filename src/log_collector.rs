//! Process-wide logger.
//!
//! Wires every `log::info!()`, `log::warn!()`, `log::error!()` call into one
//! sink that timestamps and classifies each line:
//!
//! ```text
//! [2026-01-31 14:02:11] [INFO] [Orchestrator] Stage 'kernel' started
//! [2026-01-31 14:02:12] [WARNING] [Knob] /sys/devices/system/cpu/smt/control not present
//! ```
//!
//! Lines go to stderr and, when a log file is configured, are appended to it
//! and flushed immediately so a crashed or interrupted run keeps its trail.
//! The file is only created once the host prerequisites pass; earlier lines
//! are buffered and written when it opens.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

static INSTALLED: OnceCell<&'static ConsoleLogger> = OnceCell::new();

/// Where file lines go. Lines are held back until the file is opened.
enum FileSink {
    Disabled,
    Pending { path: PathBuf, lines: Vec<String> },
    Open(File),
}

pub struct ConsoleLogger {
    level: LevelFilter,
    file: Mutex<FileSink>,
}

impl ConsoleLogger {
    pub fn new(level: LevelFilter) -> Self {
        ConsoleLogger {
            level,
            file: Mutex::new(FileSink::Disabled),
        }
    }

    /// Also append every line to `path`, once [`ConsoleLogger::open_file`] runs.
    ///
    /// Until then lines are buffered and the filesystem is not touched.
    pub fn with_log_file(self, path: &Path) -> Self {
        ConsoleLogger {
            file: Mutex::new(FileSink::Pending {
                path: path.to_path_buf(),
                lines: Vec::new(),
            }),
            ..self
        }
    }

    /// Create the log file and its directory, then flush the buffered lines.
    ///
    /// On failure the file is dropped for the rest of the run.
    pub fn open_file(&self) -> io::Result<()> {
        let mut sink = match self.file.lock() {
            Ok(sink) => sink,
            Err(_) => return Ok(()),
        };
        let (path, lines) = match std::mem::replace(&mut *sink, FileSink::Disabled) {
            FileSink::Pending { path, lines } => (path, lines),
            other => {
                *sink = other;
                return Ok(());
            }
        };

        let opened = open_append(&path).and_then(|mut file| {
            for line in &lines {
                writeln!(file, "{}", line)?;
            }
            file.flush()?;
            Ok(file)
        });
        match opened {
            Ok(file) => {
                *sink = FileSink::Open(file);
                Ok(())
            }
            Err(e) => Err(io::Error::new(
                e.kind(),
                format!("cannot open log file {}: {}", path.display(), e),
            )),
        }
    }

    /// Install as the global logger. Can only succeed once per process.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let level = self.level;
        let logger: &'static ConsoleLogger = Box::leak(Box::new(self));
        log::set_logger(logger)?;
        log::set_max_level(level);
        let _ = INSTALLED.set(logger);
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Open the installed logger's pending log file. A no-op without one.
pub fn open_log_file() -> io::Result<()> {
    match INSTALLED.get() {
        Some(logger) => logger.open_file(),
        None => Ok(()),
    }
}

/// Severity label as printed: `WARN` is spelled out as `WARNING`.
pub fn level_label(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARNING",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// `[YYYY-MM-DD HH:MM:SS] [LEVEL] message`
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "[{}] [{}] {}",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        level_label(level),
        message
    )
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), &record.args().to_string());
        eprintln!("{}", line);

        if let Ok(mut sink) = self.file.lock() {
            match &mut *sink {
                FileSink::Disabled => {}
                FileSink::Pending { lines, .. } => lines.push(line),
                FileSink::Open(file) => {
                    // Disk errors must not take the run down with them
                    let _ = writeln!(file, "{}", line).and_then(|_| file.flush());
                }
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.file.lock() {
            if let FileSink::Open(file) = &mut *sink {
                let _ = file.flush();
            }
        }
    }
}

/// Install the logger for the binary: Info by default, Debug when verbose.
///
/// The log file stays closed until [`open_log_file`] is called.
pub fn init_logging(verbose: bool, log_file: Option<&Path>) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let logger = match log_file {
        Some(path) => ConsoleLogger::new(level).with_log_file(path),
        None => ConsoleLogger::new(level),
    };

    if logger.install().is_err() {
        eprintln!("{}", format_line(Level::Warn, "logger already installed"));
    }
}
