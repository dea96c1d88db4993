//! One enumeration-and-termination pass over the process table.

use crate::error::ProcError;
use crate::model::{BlockConfig, ProcessHandle};
use crate::process::ProcessTable;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How long a terminated process gets to actually exit.
pub const EXIT_TIMEOUT: Duration = Duration::from_secs(3);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Path,
    Name,
}

/// Normalized denylist used for set-membership matching.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    paths: HashSet<PathBuf>,
    names: HashSet<String>,
}

impl Denylist {
    pub fn new<P, N>(paths: P, names: N) -> Self
    where
        P: IntoIterator,
        P::Item: AsRef<Path>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| normalize_path(p.as_ref()))
                .collect(),
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn from_config(cfg: &BlockConfig) -> Self {
        Self::new(&cfg.paths, &cfg.names)
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.names.is_empty()
    }

    /// Path is checked first; a process matching both still matches once.
    pub fn matches(&self, process: &ProcessHandle) -> Option<MatchKind> {
        if !self.paths.is_empty() {
            if let Some(exe) = process.exe.as_deref() {
                let hit = if exe.is_absolute() {
                    self.paths.contains(exe)
                } else {
                    self.paths.contains(&normalize_path(exe))
                };
                if hit {
                    return Some(MatchKind::Path);
                }
            }
        }
        if !self.names.is_empty() {
            if let Some(name) = process.name.as_deref() {
                if self.names.contains(&name.to_lowercase()) {
                    return Some(MatchKind::Name);
                }
            }
        }
        None
    }
}

/// Absolute form of a denylisted path. Symlinks are resolved when the file exists,
/// since the kernel reports resolved executable paths.
pub fn normalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Tallies for one sweep. Every successful termination request counts once,
/// whether or not the process exited in time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub blocked: u32,
    pub attempts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepEvent {
    Terminated { pid: i32, name: String },
    SoftFailure { pid: i32, name: String, reason: ProcError },
}

/// Terminate every running process on the denylist.
///
/// Failures are per process: they are reported through `on_event` and the pass
/// moves on. Takes at most `exit_timeout` per matching process. Once
/// `stop_requested` returns true no further process is signalled; the one
/// already signalled still gets its exit wait and stays counted.
///
/// Table calls read procfs, so they run on the blocking pool.
pub async fn sweep<S, F>(
    table: &Arc<dyn ProcessTable>,
    denylist: &Denylist,
    exit_timeout: Duration,
    stop_requested: S,
    mut on_event: F,
) -> SweepReport
where
    S: Fn() -> bool,
    F: FnMut(SweepEvent),
{
    let mut report = SweepReport::default();
    if denylist.is_empty() {
        return report;
    }

    let processes = match on_blocking_pool(table, |t| t.snapshot()).await {
        Ok(processes) => processes,
        Err(e) => {
            warn!("Failed to enumerate processes: {}", e);
            return report;
        }
    };

    for process in processes {
        let Some(kind) = denylist.matches(&process) else {
            continue;
        };
        if stop_requested() {
            debug!("Stop requested; leaving the rest of this sweep");
            break;
        }
        let name = process.display_name().to_string();
        debug!("PID {} ({}) matched by {:?}", process.pid, name, kind);

        let target = process.clone();
        if let Err(e) = on_blocking_pool(table, move |t| t.terminate(&target)).await {
            warn!("Failed to terminate process {}: {}", process.pid, e);
            on_event(SweepEvent::SoftFailure {
                pid: process.pid,
                name,
                reason: e,
            });
            continue;
        }
        report.blocked += 1;
        report.attempts += 1;

        if wait_for_exit(table, &process, exit_timeout).await {
            info!("Terminated process {} ({}).", process.pid, name);
            on_event(SweepEvent::Terminated {
                pid: process.pid,
                name,
            });
        } else {
            let e = ProcError::Timeout(process.pid, exit_timeout);
            warn!("Failed to terminate process {}: {}", process.pid, e);
            on_event(SweepEvent::SoftFailure {
                pid: process.pid,
                name,
                reason: e,
            });
        }
    }

    report
}

/// Run a process-table call on tokio's blocking pool.
async fn on_blocking_pool<T, C>(table: &Arc<dyn ProcessTable>, call: C) -> Result<T, ProcError>
where
    T: Send + 'static,
    C: FnOnce(&dyn ProcessTable) -> Result<T, ProcError> + Send + 'static,
{
    let table = Arc::clone(table);
    tokio::task::spawn_blocking(move || call(table.as_ref()))
        .await
        .map_err(|e| ProcError::Procfs(format!("process table task failed: {e}")))?
}

/// Poll until the process is gone or `timeout` passes. Returns whether it exited.
async fn wait_for_exit(
    table: &Arc<dyn ProcessTable>,
    process: &ProcessHandle,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let target = process.clone();
        // A failed check is treated as still running until the deadline.
        let running = on_blocking_pool(table, move |t| Ok(t.is_running(&target)))
            .await
            .unwrap_or(true);
        if !running {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(EXIT_POLL_INTERVAL).await;
    }
}
