//! Session lifecycle controller.
//!
//! Owns start/stop orchestration and forwards worker events to presentation layers.

use crate::engine::{Blocker, BlockerHandle, Clock, EXIT_TIMEOUT};
use crate::model::{BlockConfig, BlockerEvent, InfoEvent, RunOutcome};
use crate::notify::NotifySink;
use crate::process::ProcessTable;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, Instant};
use tracing::{info, warn, Dispatch};

/// Commands emitted by UI layers to control the running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UiCommand {
    Stop,
}

/// Collaborators injected into every session the controller starts.
#[derive(Clone)]
pub(crate) struct SessionDeps {
    pub table: Arc<dyn ProcessTable>,
    pub clock: Arc<dyn Clock>,
    pub notifier: NotifySink,
    pub dispatch: Option<Dispatch>,
}

impl SessionDeps {
    fn blocker(&self, cfg: BlockConfig) -> Blocker {
        let blocker = Blocker::new(cfg)
            .with_process_table(self.table.clone())
            .with_clock(self.clock.clone())
            .with_notifier(self.notifier.clone());
        match &self.dispatch {
            Some(dispatch) => blocker.with_dispatch(dispatch.clone()),
            None => blocker,
        }
    }
}

/// How a session controlled by [`run_controller`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionReport {
    pub session_id: String,
    pub outcome: RunOutcome,
}

/// Run one blocking session, forwarding events until it finishes.
///
/// A closed command channel counts as a stop request.
pub(crate) async fn run_controller(
    cfg: BlockConfig,
    deps: SessionDeps,
    event_tx: UnboundedSender<BlockerEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<SessionReport> {
    // A stop can legitimately take one poll interval plus a termination wait.
    let stop_grace = cfg.poll_interval + EXIT_TIMEOUT;

    let mut handle = BlockerHandle::new(deps.blocker(cfg));
    let mut events = handle.subscribe();
    handle.start().context("start blocker")?;
    info!("Session {} started", handle.session_id());

    let mut cmd_open = true;
    // Stop watchdog: if a stop takes too long, emit a status message to keep UI feedback alive.
    let mut stop_deadline: Option<Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if cmd_open => {
                if cmd.is_none() {
                    cmd_open = false;
                }
                if stop_deadline.is_none() && !handle.status().is_terminal() {
                    info!("Stop requested");
                    handle.stop();
                    let _ = event_tx.send(BlockerEvent::Info(InfoEvent::Message(
                        "Stopping…".into(),
                    )));
                    stop_deadline = Some(Instant::now() + stop_grace);
                }
            }
            ev = events.recv() => {
                match ev {
                    Ok(ev) => {
                        let done = matches!(ev, BlockerEvent::Finished(_));
                        let _ = event_tx.send(ev);
                        if done {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Event consumer lagged; {} event(s) dropped", missed);
                        let _ = event_tx.send(BlockerEvent::Info(InfoEvent::Lagged { missed }));
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = stop_deadline {
                    if Instant::now() >= deadline {
                        let _ = event_tx.send(BlockerEvent::Info(InfoEvent::StillStopping));
                        stop_deadline = None;
                    }
                }
            }
        }
    }

    let outcome = handle.wait().await?;
    Ok(SessionReport {
        session_id: handle.session_id().to_string(),
        outcome,
    })
}
