use crate::error::BlockError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Seconds between process sweeps when nothing else is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest session a user can ask for, in minutes (one day).
pub const MAX_DURATION_MINUTES: u64 = 1440;

/// Longest gap between sweeps, in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 60;

/// Immutable configuration of one blocking session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    /// Absolute executable paths to block.
    pub paths: BTreeSet<PathBuf>,
    /// Lowercase process names to block.
    pub names: BTreeSet<String>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    #[serde(default)]
    pub start_at: Option<StartTime>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub notify: bool,
}

impl BlockConfig {
    /// Checks the invariants the worker relies on. Empty denylists are allowed; they match nothing.
    pub fn validate(&self) -> Result<(), BlockError> {
        if self.duration.is_zero() {
            return Err(BlockError::Config(
                "enforcement duration must be positive".into(),
            ));
        }
        if self.poll_interval < Duration::from_secs(1) {
            return Err(BlockError::Config(
                "poll interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Whole minutes of enforcement, as shown to the user.
    pub fn duration_minutes(&self) -> u64 {
        self.duration.as_secs() / 60
    }
}

/// Wall-clock time of day (24-hour) at which enforcement should begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StartTime {
    hour: u8,
    minute: u8,
}

impl StartTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, BlockError> {
        if hour > 23 || minute > 59 {
            return Err(BlockError::InvalidStartTime(format!(
                "{hour:02}:{minute:02}"
            )));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(self) -> u8 {
        self.hour
    }

    pub fn minute(self) -> u8 {
        self.minute
    }
}

impl FromStr for StartTime {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BlockError::InvalidStartTime(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).map_err(|_| invalid())
    }
}

impl fmt::Display for StartTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl TryFrom<String> for StartTime {
    type Error = BlockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StartTime> for String {
    fn from(value: StartTime) -> Self {
        value.to_string()
    }
}

/// Lifecycle of a blocking session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    CountingDown,
    Enforcing,
    Completed,
    Stopped,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Stopped | RunState::Failed
        )
    }
}

/// Snapshot emitted by the worker once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// `CountingDown` or `Enforcing`.
    pub phase: RunState,
    /// Until enforcement starts while counting down, until the session ends while enforcing.
    pub seconds_remaining: u64,
    pub blocked_this_tick: u32,
    pub cumulative_attempts: u64,
}

/// Terminal signal of a session; emitted exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Completed,
    Stopped,
    Failed(String),
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed => RunState::Completed,
            RunOutcome::Stopped => RunState::Stopped,
            RunOutcome::Failed(_) => RunState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockerEvent {
    PhaseStarted {
        phase: RunState,
    },
    /// Enforcement is scheduled for the given local date-time.
    Scheduled {
        at: String,
    },
    Stats(StatsUpdate),
    Terminated {
        pid: i32,
        name: String,
    },
    SoftFailure {
        pid: i32,
        name: String,
        reason: String,
    },
    Info(InfoEvent),
    Finished(RunOutcome),
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    /// The consumer fell behind and this many events were discarded.
    Lagged { missed: u64 },
    StillStopping,
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Lagged { missed } => {
                format!("Display fell behind; skipped {missed} update(s)")
            }
            InfoEvent::StillStopping => "Still stopping…".to_string(),
        }
    }
}

/// A running process as seen during one sweep. Never cached across ticks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: i32,
    /// Unavailable when the process vanished mid-read.
    pub name: Option<String>,
    /// Unavailable for processes we lack the privilege to inspect.
    pub exe: Option<PathBuf>,
    /// Kernel start time in clock ticks, used to detect PID reuse.
    pub start_time: Option<u64>,
}

impl ProcessHandle {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("?")
    }
}
