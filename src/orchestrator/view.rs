//! User-facing session state derived from worker events.

use crate::model::{BlockerEvent, RunOutcome, RunState};
use std::collections::VecDeque;

const MAX_ACTIVITY: usize = 50;
const MAX_HISTORY: usize = 120;

/// Everything a presentation layer shows about the current session.
#[derive(Debug, Clone)]
pub(crate) struct SessionView {
    pub state: RunState,
    pub seconds_remaining: Option<u64>,
    pub blocked_last_tick: u32,
    pub attempts: u64,
    pub exited: u64,
    pub failures: u64,
    pub ticks: u64,
    pub scheduled_at: Option<String>,
    pub outcome: Option<RunOutcome>,
    pub info: String,
    /// Newest first.
    pub activity: VecDeque<String>,
    /// Blocked count per enforcing tick, oldest first.
    pub blocked_history: Vec<u64>,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            seconds_remaining: None,
            blocked_last_tick: 0,
            attempts: 0,
            exited: 0,
            failures: 0,
            ticks: 0,
            scheduled_at: None,
            outcome: None,
            info: String::new(),
            activity: VecDeque::new(),
            blocked_history: Vec::new(),
        }
    }
}

impl SessionView {
    pub fn apply(&mut self, ev: &BlockerEvent) {
        match ev {
            BlockerEvent::PhaseStarted { phase } => {
                self.state = *phase;
                self.info = match phase {
                    RunState::CountingDown => "Waiting for scheduled start".into(),
                    RunState::Enforcing => "Blocking applications".into(),
                    other => format!("{other:?}"),
                };
            }
            BlockerEvent::Scheduled { at } => {
                self.scheduled_at = Some(at.clone());
                self.push_activity(format!("Blocking scheduled at {at}"));
            }
            BlockerEvent::Stats(s) => {
                self.state = s.phase;
                self.seconds_remaining = Some(s.seconds_remaining);
                self.blocked_last_tick = s.blocked_this_tick;
                self.attempts = s.cumulative_attempts;
                if s.phase == RunState::Enforcing {
                    self.ticks += 1;
                    self.blocked_history.push(u64::from(s.blocked_this_tick));
                    if self.blocked_history.len() > MAX_HISTORY {
                        let excess = self.blocked_history.len() - MAX_HISTORY;
                        self.blocked_history.drain(0..excess);
                    }
                }
            }
            BlockerEvent::Terminated { pid, name } => {
                self.exited += 1;
                self.push_activity(format!("Terminated {name} (PID: {pid})."));
            }
            BlockerEvent::SoftFailure { pid, name, reason } => {
                self.failures += 1;
                self.push_activity(format!("Could not terminate {name} (PID: {pid}): {reason}"));
            }
            BlockerEvent::Info(info) => {
                self.info = info.to_message();
            }
            BlockerEvent::Finished(outcome) => {
                self.state = outcome.state();
                self.seconds_remaining = None;
                self.blocked_last_tick = 0;
                self.info = outcome_message(outcome);
                self.push_activity(self.info.clone());
                self.outcome = Some(outcome.clone());
            }
        }
    }

    fn push_activity(&mut self, line: String) {
        self.activity.push_front(line);
        self.activity.truncate(MAX_ACTIVITY);
    }

    pub fn time_label(&self) -> String {
        match (self.state, self.seconds_remaining) {
            (RunState::CountingDown, Some(s)) => format!("Starts In: {}", format_remaining(s)),
            (_, Some(s)) => format!("Time Remaining: {}", format_remaining(s)),
            (_, None) => "Time Remaining: N/A".into(),
        }
    }

    pub fn blocked_label(&self) -> String {
        format!("Blocked Applications: {}", self.blocked_last_tick)
    }

    pub fn attempts_label(&self) -> String {
        format!("Termination Attempts: {}", self.attempts)
    }

    /// One-line status used by text mode.
    pub fn status_line(&self) -> String {
        format!(
            "{} | {} | {}",
            self.time_label(),
            self.blocked_label(),
            self.attempts_label()
        )
    }

    /// Fraction of the current phase still to go, when known.
    pub fn progress(&self, phase_total_secs: u64) -> f64 {
        match self.seconds_remaining {
            Some(s) if phase_total_secs > 0 => {
                1.0 - (s.min(phase_total_secs) as f64 / phase_total_secs as f64)
            }
            _ => 0.0,
        }
    }
}

fn outcome_message(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Completed => "Finished blocking applications.".into(),
        RunOutcome::Stopped => "Blocking session has been stopped.".into(),
        RunOutcome::Failed(reason) => format!("Blocking session failed: {reason}"),
    }
}

/// `"4m 10s"`; negative values never occur, zero renders as `"0m 0s"`.
fn format_remaining(seconds: u64) -> String {
    let (mins, secs) = (seconds / 60, seconds % 60);
    format!("{mins}m {secs}s")
}
