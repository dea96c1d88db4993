//! Access to the operating system's process table.
//!
//! The sweep only talks to [`ProcessTable`], so it can run against the live
//! system or against a synthetic table in tests.

#[cfg(test)]
pub(crate) mod fake;
mod linux;

use crate::error::ProcError;
use crate::model::ProcessHandle;

pub use linux::SystemProcessTable;

pub trait ProcessTable: Send + Sync {
    /// Enumerate processes visible at our privilege level, excluding ourselves.
    fn snapshot(&self) -> Result<Vec<ProcessHandle>, ProcError>;

    /// Ask the process to exit. Returns once the request is delivered, not when it exits.
    fn terminate(&self, process: &ProcessHandle) -> Result<(), ProcError>;

    /// Whether the process from `snapshot` is still alive. Zombies count as exited.
    fn is_running(&self, process: &ProcessHandle) -> bool;
}
