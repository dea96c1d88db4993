//! Process-wide logging.
//!
//! `init` runs once, before any blocker starts. The returned guard owns the
//! `Dispatch` handed to each worker and syncs the event log when dropped at exit.

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Dispatch;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Append-only event log. `None` disables file logging.
    pub file: Option<PathBuf>,
    /// Also log to stderr (never in TUI mode).
    pub stderr: bool,
}

pub struct LogGuard {
    dispatch: Dispatch,
    file: Option<Arc<File>>,
    path: Option<PathBuf>,
}

impl LogGuard {
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = file.sync_all();
        }
    }
}

/// `<data dir>/app-blocker/app-blocker.log`
pub fn default_log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("app-blocker").join("app-blocker.log"))
}

/// Install the global subscriber.
pub fn init(opts: &LogOptions) -> Result<LogGuard> {
    let guard = build(opts)?;
    tracing::dispatcher::set_global_default(guard.dispatch())
        .context("logging already initialized")?;
    Ok(guard)
}

fn build(opts: &LogOptions) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&opts.level));

    let file = match opts.file.as_deref() {
        Some(path) => Some(Arc::new(open_log(path)?)),
        None => None,
    };
    let file_layer = file.clone().map(|f| {
        fmt::layer()
            .with_writer(f)
            .with_ansi(false)
            .with_target(false)
    });
    let stderr_layer = opts
        .stderr
        .then(|| fmt::layer().with_writer(std::io::stderr).with_target(false));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer);

    Ok(LogGuard {
        dispatch: Dispatch::new(subscriber),
        file,
        path: opts.file.clone(),
    })
}

fn open_log(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}
