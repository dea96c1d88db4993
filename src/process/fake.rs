//! Synthetic process table for exercising sweeps without touching real processes.

use super::ProcessTable;
use crate::error::ProcError;
use crate::model::ProcessHandle;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// Exits as soon as it is asked to.
    Obliging,
    /// Accepts the request but never exits.
    Stubborn,
    /// Owned by someone else; the request is refused.
    Protected,
    /// Listed, but gone by the time it is signalled.
    Vanishing,
    /// Exits on request, then is relaunched before the next sweep.
    Respawning,
}

#[derive(Debug, Clone)]
struct FakeProcess {
    handle: ProcessHandle,
    behavior: Behavior,
    alive: bool,
}

#[derive(Debug, Default)]
pub(crate) struct FakeProcessTable {
    processes: Mutex<Vec<FakeProcess>>,
    terminated: Mutex<Vec<i32>>,
}

impl FakeProcessTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn spawn(
        &self,
        pid: i32,
        name: Option<&str>,
        exe: Option<&str>,
        behavior: Behavior,
    ) -> &Self {
        let mut processes = self.processes.lock().unwrap();
        processes.push(FakeProcess {
            handle: ProcessHandle {
                pid,
                name: name.map(str::to_string),
                exe: exe.map(PathBuf::from),
                start_time: Some(pid as u64 * 100),
            },
            behavior,
            alive: true,
        });
        self
    }

    pub(crate) fn kill_externally(&self, pid: i32) {
        let mut processes = self.processes.lock().unwrap();
        for p in processes.iter_mut().filter(|p| p.handle.pid == pid) {
            p.alive = false;
        }
    }

    /// PIDs in the order termination was requested (successfully).
    pub(crate) fn terminated(&self) -> Vec<i32> {
        self.terminated.lock().unwrap().clone()
    }

    pub(crate) fn alive(&self, pid: i32) -> bool {
        self.processes
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.handle.pid == pid && p.alive)
    }
}

impl ProcessTable for FakeProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessHandle>, ProcError> {
        let mut processes = self.processes.lock().unwrap();
        for p in processes.iter_mut() {
            if p.behavior == Behavior::Respawning {
                p.alive = true;
            }
        }
        Ok(processes
            .iter()
            .filter(|p| p.alive)
            .map(|p| p.handle.clone())
            .collect())
    }

    fn terminate(&self, process: &ProcessHandle) -> Result<(), ProcError> {
        let mut processes = self.processes.lock().unwrap();
        let entry = processes
            .iter_mut()
            .find(|p| p.handle.pid == process.pid && p.alive)
            .ok_or(ProcError::NotFound(process.pid))?;
        match entry.behavior {
            Behavior::Obliging | Behavior::Respawning => entry.alive = false,
            Behavior::Stubborn => {}
            Behavior::Protected => return Err(ProcError::PermissionDenied(process.pid)),
            Behavior::Vanishing => {
                entry.alive = false;
                return Err(ProcError::NotFound(process.pid));
            }
        }
        self.terminated.lock().unwrap().push(process.pid);
        Ok(())
    }

    fn is_running(&self, process: &ProcessHandle) -> bool {
        self.alive(process.pid)
    }
}
