//! Shared logging utilities for lattice binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str =
    "lattice_jobs=info,lattice_vector=info,lattice_memory=info,lattice_llm=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by lattice binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let file_writer = RotatingWriter::shared(log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
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

/// Lattice home directory: `$LATTICE_HOME` or `~/.lattice`.
pub fn lattice_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("LATTICE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".lattice")
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    lattice_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-rotated appender: `app.log`, shifted to `app.log.1 … .N` when
/// the current file exceeds the size cap.
struct RotatingWriter {
    dir: PathBuf,
    base_name: String,
    file: File,
    current_size: u64,
}

impl RotatingWriter {
    fn shared(dir: PathBuf, app_name: &str) -> io::Result<SharedWriter> {
        let writer = Self::new(dir, app_name)?;
        Ok(SharedWriter(Arc::new(Mutex::new(writer))))
    }

    fn new(dir: PathBuf, app_name: &str) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let base_name = sanitize_name(app_name);
        let path = dir.join(format!("{base_name}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let current_size = file.metadata()?.len();
        let mut writer = Self {
            dir,
            base_name,
            file,
            current_size,
        };
        if writer.current_size > MAX_LOG_FILE_SIZE {
            writer.rotate()?;
        }
        Ok(writer)
    }

    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for index in (1..MAX_LOG_FILES).rev() {
            let from = self.dir.join(format!("{}.log.{index}", self.base_name));
            if from.exists() {
                let to = self.dir.join(format!("{}.log.{}", self.base_name, index + 1));
                let _ = fs::rename(from, to);
            }
        }
        let _ = fs::rename(
            self.current_path(),
            self.dir.join(format!("{}.log.1", self.base_name)),
        );
        // Anything shifted past the cap is dropped.
        let overflow = self
            .dir
            .join(format!("{}.log.{}", self.base_name, MAX_LOG_FILES + 1));
        let _ = fs::remove_file(overflow);

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.current_size = 0;
        Ok(())
    }

    fn write_all_rotating(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.current_size + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.current_size += buf.len() as u64;
        Ok(())
    }
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<RotatingWriter>>);

impl Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.0.lock().expect("log writer lock poisoned");
        writer.write_all_rotating(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().expect("log writer lock poisoned").file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedWriter {
    type Writer = SharedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "lattice".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize_name("worker-1"), "worker-1");
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
        assert_eq!(sanitize_name(""), "lattice");
    }

    #[test]
    fn writer_rotates_at_the_size_cap() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RotatingWriter::new(dir.path().to_path_buf(), "app").unwrap();
        // Force the cap so one more write triggers rotation.
        writer.current_size = MAX_LOG_FILE_SIZE;
        writer.write_all_rotating(b"after rotation\n").unwrap();

        assert!(dir.path().join("app.log").exists());
        assert!(dir.path().join("app.log.1").exists());
        let current = fs::read_to_string(dir.path().join("app.log")).unwrap();
        assert_eq!(current, "after rotation\n");
    }
}
