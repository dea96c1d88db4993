//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines describing a finished session.

use crate::model::{BlockConfig, RunOutcome};
use crate::orchestrator::SessionView;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from the session configuration and the final view.
pub(crate) fn build_text_summary(
    session_id: Option<&str>,
    cfg: &BlockConfig,
    view: &SessionView,
) -> TextSummary {
    let mut lines = Vec::new();

    if let Some(id) = session_id {
        lines.push(format!("Session: {id}"));
    }
    let outcome = match &view.outcome {
        Some(RunOutcome::Completed) => "completed".to_string(),
        Some(RunOutcome::Stopped) => "stopped by user".to_string(),
        Some(RunOutcome::Failed(reason)) => format!("failed ({reason})"),
        None => "unknown".to_string(),
    };
    lines.push(format!("Outcome: {outcome}"));

    if !cfg.names.is_empty() {
        let names: Vec<&str> = cfg.names.iter().map(String::as_str).collect();
        lines.push(format!("Names: {}", names.join(", ")));
    }
    for path in &cfg.paths {
        lines.push(format!("Path: {}", path.display()));
    }
    let start = cfg
        .start_at
        .map(|t| format!(" starting {t}"))
        .unwrap_or_default();
    lines.push(format!(
        "Schedule: {}{} (checked every {})",
        humantime::format_duration(cfg.duration),
        start,
        humantime::format_duration(cfg.poll_interval)
    ));

    lines.push(format!("Termination attempts: {}", view.attempts));
    lines.push(format!("Processes exited: {}", view.exited));
    if view.failures > 0 {
        lines.push(format!("Soft failures: {}", view.failures));
    }
    lines.push(format!("Enforcement ticks: {}", view.ticks));

    TextSummary { lines }
}
