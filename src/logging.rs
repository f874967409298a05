//! Tracing setup for the engine.
//!
//! Events go to a log file under the XDG state directory so embedding
//! applications keep their stdout/stderr clean; `init_logging_stderr` is the
//! fallback when the state directory is unusable.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,parget=debug";

/// Sink handed out per event: a fresh clone of the log file handle, or stderr
/// when cloning fails mid-flight.
enum LogSink {
    File(std::fs::File),
    Stderr,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LogSink::File(f) => f.write(buf),
            LogSink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LogSink::File(f) => f.flush(),
            LogSink::Stderr => io::stderr().lock().flush(),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

fn state_log_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("parget")?;
    let dir = dirs.get_state_home();
    fs::create_dir_all(&dir).with_context(|| format!("creating log dir {}", dir.display()))?;
    Ok(dir.join("parget.log"))
}

/// Initialize structured logging to `~/.local/state/parget/parget.log`,
/// appending across runs. Returns `Err` when the state directory or the file
/// cannot be used; call [`init_logging_stderr`] in that case.
pub fn init_logging() -> Result<()> {
    let path = state_log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    let writer = BoxMakeWriter::new(move || {
        file.try_clone().map(LogSink::File).unwrap_or(LogSink::Stderr)
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();

    tracing::info!(path = %path.display(), "logging initialized");
    Ok(())
}

/// Stderr-only logging, for when the state-dir file is unavailable.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
