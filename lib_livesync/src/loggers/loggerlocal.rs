use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Local;
use glob::glob;
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// # Logger Local Options
///
/// Controls where and how log events are written.
pub struct LoggerLocalOptions {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `"info"` or
    /// `"lib_livesync=debug,info"`).
    pub level: String,
    /// Emit console output as JSON lines instead of plain text.
    pub json: bool,
    /// Directory for the per-run log file. `None` disables file output.
    pub log_dir: Option<PathBuf>,
    /// How many earlier log files of the same app to keep.
    pub keep_files: usize,
}

impl Default for LoggerLocalOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            log_dir: None,
            keep_files: 1,
        }
    }
}

/// Installs the global `tracing` subscriber for `app_name`.
///
/// The returned guard flushes the file writer when dropped; hold it for the
/// life of the process. It is `None` when file output is disabled.
pub fn init_tracing(
    app_name: &str,
    options: &LoggerLocalOptions,
) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.level))
        .with_context(|| format!("invalid log filter {:?}", options.level))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if options.json {
        layers.push(fmt::layer().json().boxed());
    } else {
        layers.push(fmt::layer().with_target(false).boxed());
    }

    let mut guard = None;
    if let Some(log_dir) = &options.log_dir {
        let path = prepare_log_file(app_name, log_dir, options.keep_files)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        let (writer, file_guard) = tracing_appender::non_blocking(file);
        layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(app = app_name, "tracing initialized");
    Ok(guard)
}

/// Ensures `log_dir` exists, rotates older files of `app_name` and returns the
/// path of this run's timestamped log file.
pub fn prepare_log_file(app_name: &str, log_dir: &Path, keep: usize) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    rotate_logs(app_name, log_dir, keep)?;

    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    Ok(log_dir.join(format!("{app_name}-{timestamp}.log")))
}

/// Deletes all but the `keep` newest log files of `app_name` in `log_dir`.
/// File names carry a sortable timestamp, so name order is age order.
/// Returns how many files were removed.
pub fn rotate_logs(app_name: &str, log_dir: &Path, keep: usize) -> anyhow::Result<usize> {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("bad log rotation pattern {pattern}"))?
        .filter_map(Result::ok)
        .collect();

    // Newest first.
    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    let mut removed = 0;
    for old_file in log_files.iter().skip(keep) {
        match fs::remove_file(old_file) {
            Ok(()) => removed += 1,
            Err(err) => eprintln!("Error deleting old log file {}: {}", old_file.display(), err),
        }
    }
    Ok(removed)
}
