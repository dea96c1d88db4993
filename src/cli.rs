use crate::engine::SystemClock;
use crate::logging::LogGuard;
use crate::model::{
    BlockConfig, BlockerEvent, RunOutcome, StartTime, DEFAULT_POLL_INTERVAL, MAX_DURATION_MINUTES,
    MAX_POLL_INTERVAL_SECS,
};
use crate::notify::{DesktopNotifier, NotifySink};
use crate::orchestrator::{self, SessionDeps, SessionView, UiCommand};
use crate::process::SystemProcessTable;
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const DEFAULT_DURATION_MINUTES: u64 = 30;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "app-blocker",
    version,
    about = "Terminate distracting applications for a scheduled focus session"
)]
pub struct Cli {
    /// Executable to block (repeatable)
    #[arg(long = "path", value_name = "EXE")]
    pub paths: Vec<PathBuf>,

    /// Process name to block; repeat or separate with ';' (e.g. notepad.exe;calc)
    #[arg(long = "name", value_name = "NAME", value_delimiter = ';')]
    pub names: Vec<String>,

    /// Enforcement duration in minutes [default: 30]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_DURATION_MINUTES))]
    pub duration: Option<u64>,

    /// Start blocking at the next occurrence of this local time (24-hour)
    #[arg(long, value_name = "HH:MM")]
    pub start: Option<StartTime>,

    /// Seconds between process checks [default: 1]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_POLL_INTERVAL_SECS))]
    pub interval: Option<u64>,

    /// Use --notify true or --notify false to override desktop notifications [default: true]
    #[arg(long, action = clap::ArgAction::Set)]
    pub notify: Option<bool>,

    /// JSON profile with paths, names and timing; command-line values take precedence
    #[arg(long)]
    pub profile: Option<PathBuf>,

    /// Print one JSON event per line (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print status lines and a text summary (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Event log file [default: <data dir>/app-blocker/app-blocker.log]
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Do not write the event log file
    #[arg(long, conflicts_with = "log_file")]
    pub no_log_file: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Whether the full-screen TUI owns the terminal.
    pub fn uses_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        if self.no_log_file {
            return None;
        }
        self.log_file
            .clone()
            .or_else(crate::logging::default_log_path)
    }
}

pub async fn run(args: Cli, clock: SystemClock, log: &LogGuard) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive."));
    }

    // Fails fast on bad input, before any process is touched.
    let cfg = build_config(&args)?;

    if !nix::unistd::geteuid().is_root() {
        warn!("Not running as root; processes owned by other users cannot be terminated.");
    }
    if let Some(path) = log.path() {
        info!("Event log: {}", path.display());
    }

    let deps = SessionDeps {
        table: Arc::new(SystemProcessTable),
        clock: Arc::new(clock),
        notifier: if cfg.notify {
            NotifySink::spawn(DesktopNotifier)
        } else {
            NotifySink::disabled()
        },
        dispatch: Some(log.dispatch()),
    };

    if args.uses_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(cfg, deps).await;
        }
    }

    run_headless(args.json, cfg, deps).await
}

/// Build a `BlockConfig` from CLI arguments and the optional profile.
pub fn build_config(args: &Cli) -> Result<BlockConfig> {
    let profile = match args.profile.as_deref() {
        Some(path) => crate::profile::load(path)?,
        None => Default::default(),
    };

    let paths: BTreeSet<PathBuf> = profile
        .paths
        .iter()
        .chain(args.paths.iter())
        .map(|p| crate::engine::normalize_path(p))
        .collect();
    let names: BTreeSet<String> = profile
        .names
        .iter()
        .chain(args.names.iter())
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();

    if paths.is_empty() && names.is_empty() {
        return Err(anyhow::anyhow!(
            "Please specify application paths or process names to block."
        ));
    }

    let duration = match args.duration {
        Some(minutes) => Duration::from_secs(minutes * 60),
        None => profile
            .checked_duration()?
            .unwrap_or(Duration::from_secs(DEFAULT_DURATION_MINUTES * 60)),
    };
    let poll_interval = match args.interval {
        Some(secs) => Duration::from_secs(secs),
        None => profile
            .checked_poll_interval()?
            .unwrap_or(DEFAULT_POLL_INTERVAL),
    };

    let cfg = BlockConfig {
        paths,
        names,
        duration,
        start_at: args.start.or(profile.start_at),
        poll_interval,
        notify: args.notify.or(profile.notify).unwrap_or(true),
    };
    cfg.validate().context("invalid blocking configuration")?;
    Ok(cfg)
}

/// Ctrl-C asks the session to stop instead of killing the process.
fn spawn_ctrl_c(cmd_tx: mpsc::UnboundedSender<UiCommand>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(UiCommand::Stop);
        }
    });
}

/// Text or JSON-lines session without the TUI.
async fn run_headless(json: bool, cfg: BlockConfig, deps: SessionDeps) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<BlockerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    spawn_ctrl_c(cmd_tx.clone());

    let controller = tokio::spawn(orchestrator::run_controller(
        cfg.clone(),
        deps,
        evt_tx,
        cmd_rx,
    ));

    let mut view = SessionView::default();
    while let Some(ev) = evt_rx.recv().await {
        view.apply(&ev);
        if json {
            let line = serde_json::to_string(&ev).context("serialize event")?;
            let _ = out_tx.send(OutputLine::Stdout(line));
        } else if let Some(line) = text_line(&ev, &view) {
            let _ = out_tx.send(OutputLine::Stderr(line));
        }
    }

    let report = controller
        .await
        .context("controller task failed")?
        .context("blocking session failed")?;
    drop(cmd_tx);

    if !json {
        let summary =
            crate::text_summary::build_text_summary(Some(&report.session_id), &cfg, &view);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    match report.outcome {
        RunOutcome::Failed(reason) => Err(anyhow::anyhow!(reason)),
        RunOutcome::Completed | RunOutcome::Stopped => Ok(()),
    }
}

/// Human-readable stderr line for an event, if it deserves one.
fn text_line(ev: &BlockerEvent, view: &SessionView) -> Option<String> {
    match ev {
        BlockerEvent::PhaseStarted { .. } => Some(format!("== {} ==", view.info)),
        BlockerEvent::Scheduled { at } => Some(format!("Blocking scheduled at {at}")),
        BlockerEvent::Stats(_) => Some(view.status_line()),
        BlockerEvent::Terminated { .. } | BlockerEvent::SoftFailure { .. } => {
            view.activity.front().cloned()
        }
        BlockerEvent::Info(info) => Some(info.to_message()),
        BlockerEvent::Finished(_) => Some(view.info.clone()),
    }
}
