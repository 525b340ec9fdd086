//! Shared logging utilities for Shrinekeeper binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "shrinekeeper=info,shrine_engine=info,shrine_db=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Initialize tracing with a rolling file writer and stderr output.
///
/// The stderr layer drops to warnings unless `verbose` is set; the file
/// layer always follows `RUST_LOG` or the default filter.
pub fn init_logging(app_name: &str, verbose: bool) -> Result<()> {
    let log_dir = ensure_home_dirs().context("Failed to create shrinekeeper directories")?;
    let file_writer = RollingWriter::open(log_dir, app_name)
        .context("Failed to initialize rolling log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// The shrinekeeper home directory: `~/.shrinekeeper`, overridable via
/// `SHRINEKEEPER_HOME`.
pub fn shrinekeeper_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SHRINEKEEPER_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shrinekeeper")
}

/// Logs directory under the home.
pub fn logs_dir() -> PathBuf {
    shrinekeeper_home().join("logs")
}

/// Scan reports directory under the home.
pub fn reports_dir() -> PathBuf {
    shrinekeeper_home().join("scan-reports")
}

/// Default database path under the home.
pub fn default_db_path() -> PathBuf {
    shrinekeeper_home().join("shrinekeeper.sqlite3")
}

/// Ensure the logs and reports directories exist, returning the logs dir.
pub fn ensure_home_dirs() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    let reports = reports_dir();
    fs::create_dir_all(&reports)
        .with_context(|| format!("Failed to create reports directory: {}", reports.display()))?;
    Ok(logs)
}

struct RollingState {
    dir: PathBuf,
    base_name: String,
    file: File,
    current_size: u64,
}

/// Size-rotating log writer shared across tracing's worker contexts.
///
/// Keeps `<name>.log` plus up to `MAX_LOG_FILES - 1` rotated
/// `<name>.log.N` files, oldest discarded.
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<RollingState>>,
}

impl RollingWriter {
    fn open(dir: PathBuf, base_name: &str) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let base_name = sanitize_name(base_name);
        let (file, size) = open_current(&dir, &base_name)?;
        let mut state = RollingState {
            dir,
            base_name,
            file,
            current_size: size,
        };
        if state.current_size > MAX_LOG_FILE_SIZE {
            state.rotate()?;
        }
        Ok(Self {
            inner: Arc::new(Mutex::new(state)),
        })
    }
}

fn open_current(dir: &std::path::Path, base_name: &str) -> io::Result<(File, u64)> {
    let path = dir.join(format!("{base_name}.log"));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

impl RollingState {
    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{index}", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let max_index = MAX_LOG_FILES - 1;
        let oldest = self.rotated_path(max_index);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for idx in (1..max_index).rev() {
            let src = self.rotated_path(idx);
            if src.exists() {
                fs::rename(&src, self.rotated_path(idx + 1))?;
            }
        }
        let current = self.dir.join(format!("{}.log", self.base_name));
        if current.exists() {
            fs::rename(current, self.rotated_path(1))?;
        }

        let (file, size) = open_current(&self.dir, &self.base_name)?;
        self.file = file;
        self.current_size = size;
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }
}

pub struct RollingWriterGuard {
    inner: Arc<Mutex<RollingState>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        RollingWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for RollingWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        state.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        state.file.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::fmt::MakeWriter;

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_name("shrine/keeper scan"), "shrine_keeper_scan");
    }

    #[test]
    fn rolling_writer_appends() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = RollingWriter::open(tmp.path().to_path_buf(), "test").unwrap();

        let mut guard = writer.make_writer();
        guard.write_all(b"hello\n").unwrap();
        guard.flush().unwrap();

        let content = std::fs::read_to_string(tmp.path().join("test.log")).unwrap();
        assert_eq!(content, "hello\n");
    }
}
