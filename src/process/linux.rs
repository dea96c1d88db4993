//! Process table backed by `/proc` and POSIX signals.

use super::ProcessTable;
use crate::error::ProcError;
use crate::model::ProcessHandle;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use procfs::process::{ProcState, Process};
use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::trace;

/// `comm` is cut to this many bytes by the kernel.
const COMM_LEN: usize = 15;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessHandle>, ProcError> {
        let own_pid = std::process::id() as i32;
        let mut processes = Vec::new();

        for proc_result in procfs::process::all_processes()? {
            // Processes can exit between listing /proc and reading them.
            let Ok(proc) = proc_result else { continue };
            if proc.pid == own_pid {
                continue;
            }
            let exe = proc.exe().ok().map(strip_deleted_suffix);
            let stat = match proc.stat() {
                Ok(stat) => Some((stat.comm, stat.starttime)),
                Err(e) => {
                    trace!("no stat for PID {}: {}", proc.pid, e);
                    None
                }
            };
            if let Some(handle) = describe(proc.pid, stat, exe) {
                processes.push(handle);
            }
        }

        Ok(processes)
    }

    fn terminate(&self, process: &ProcessHandle) -> Result<(), ProcError> {
        if !same_process(process) {
            return Err(ProcError::NotFound(process.pid));
        }
        match signal::kill(Pid::from_raw(process.pid), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(ProcError::NotFound(process.pid)),
            Err(Errno::EPERM) => Err(ProcError::PermissionDenied(process.pid)),
            Err(e) => Err(ProcError::SignalError(process.pid, e.to_string())),
        }
    }

    fn is_running(&self, process: &ProcessHandle) -> bool {
        let Ok(proc) = Process::new(process.pid) else {
            return false;
        };
        // Still listed under /proc but unreadable: assume it has not exited.
        let Ok(stat) = proc.stat() else {
            return true;
        };
        if process.start_time.is_some_and(|t| t != stat.starttime) {
            return false;
        }
        !matches!(stat.state(), Ok(ProcState::Zombie) | Ok(ProcState::Dead))
    }
}

/// Build a handle from whatever could be read. Either the `(comm, start time)`
/// pair or the executable may be missing; with neither there is nothing to match.
fn describe(
    pid: i32,
    stat: Option<(String, u64)>,
    exe: Option<PathBuf>,
) -> Option<ProcessHandle> {
    if stat.is_none() && exe.is_none() {
        return None;
    }
    let (name, start_time) = match stat {
        Some((comm, start)) => (Some(full_name(&comm, exe.as_ref())), Some(start)),
        None => (None, None),
    };
    Some(ProcessHandle {
        pid,
        name,
        exe,
        start_time,
    })
}

/// Guards against signalling an unrelated process that reused the PID.
fn same_process(process: &ProcessHandle) -> bool {
    let Some(expected) = process.start_time else {
        return true;
    };
    Process::new(process.pid)
        .and_then(|p| p.stat())
        .map(|stat| stat.starttime == expected)
        .unwrap_or(false)
}

/// `/proc/<pid>/exe` reads as `/path/to/bin (deleted)` once the binary was replaced on disk.
fn strip_deleted_suffix(path: PathBuf) -> PathBuf {
    match path.as_os_str().as_bytes().strip_suffix(b" (deleted)") {
        Some(trimmed) => PathBuf::from(OsStr::from_bytes(trimmed)),
        None => path,
    }
}

/// Recover the untruncated name from the executable when `comm` hit the kernel limit.
fn full_name(comm: &str, exe: Option<&PathBuf>) -> String {
    if comm.len() >= COMM_LEN {
        if let Some(file_name) = exe.and_then(|p| p.file_name()).and_then(|n| n.to_str()) {
            if file_name.starts_with(comm) {
                return file_name.to_string();
            }
        }
    }
    comm.to_string()
}
