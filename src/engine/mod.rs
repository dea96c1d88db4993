mod schedule;
mod sweep;

use crate::error::BlockError;
use crate::model::{BlockConfig, BlockerEvent, RunOutcome, RunState, StatsUpdate};
use crate::notify::NotifySink;
use crate::process::{ProcessTable, SystemProcessTable};
use rand::Rng;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use sweep::SweepEvent;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, info_span, Dispatch, Instrument};

pub use schedule::{Clock, SystemClock};
pub use sweep::{normalize_path, EXIT_TIMEOUT};

/// Events buffered per subscriber before the oldest are discarded.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

const NOTIFY_TITLE: &str = "App Blocker";

/// A configured, not yet started, blocking session.
pub struct Blocker {
    cfg: BlockConfig,
    table: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
    notifier: NotifySink,
    dispatch: Option<Dispatch>,
    event_capacity: usize,
    session_id: String,
}

impl Blocker {
    pub fn new(cfg: BlockConfig) -> Self {
        Self {
            cfg,
            table: Arc::new(SystemProcessTable),
            clock: Arc::new(SystemClock::detect_local()),
            notifier: NotifySink::disabled(),
            dispatch: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            session_id: gen_session_id(),
        }
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sink used when `BlockConfig::notify` is set.
    pub fn with_notifier(mut self, notifier: NotifySink) -> Self {
        self.notifier = notifier;
        self
    }

    /// Logging dispatch the worker records into. Defaults to the global one.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// Generate a short random identifier used to correlate log lines of one session.
fn gen_session_id() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Cooperative stop request, observed at tick boundaries and during sleeps.
#[derive(Debug, Default)]
struct StopSignal {
    requested: AtomicBool,
    wake: Notify,
}

impl StopSignal {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit, so a sleep that starts after this still wakes.
        self.wake.notify_one();
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop arrives first. Returns whether a stop was requested.
    async fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
        self.is_requested()
    }
}

/// Controller-side handle: start, stop, observe.
///
/// Events are delivered over a bounded broadcast channel. A subscriber that
/// falls more than the channel capacity behind loses the oldest events and is
/// told how many on its next receive. `Finished` is always the last event.
pub struct BlockerHandle {
    blocker: Option<Blocker>,
    events: broadcast::Sender<BlockerEvent>,
    state_tx: Option<watch::Sender<RunState>>,
    state_rx: watch::Receiver<RunState>,
    stop: Arc<StopSignal>,
    join: Option<JoinHandle<RunOutcome>>,
    outcome: Option<RunOutcome>,
    session_id: String,
}

impl BlockerHandle {
    pub fn new(blocker: Blocker) -> Self {
        let (events, _) = broadcast::channel(blocker.event_capacity);
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        Self {
            session_id: blocker.session_id.clone(),
            blocker: Some(blocker),
            events,
            state_tx: Some(state_tx),
            state_rx,
            stop: Arc::new(StopSignal::default()),
            join: None,
            outcome: None,
        }
    }

    /// Subscribe before `start` to see every event of the session.
    pub fn subscribe(&self) -> broadcast::Receiver<BlockerEvent> {
        self.events.subscribe()
    }

    /// Spawn the worker on the current tokio runtime.
    pub fn start(&mut self) -> Result<(), BlockError> {
        let (Some(blocker), Some(state_tx)) = (self.blocker.take(), self.state_tx.take()) else {
            return Err(BlockError::AlreadyStarted);
        };
        let Blocker {
            cfg,
            table,
            clock,
            notifier,
            dispatch,
            session_id,
            ..
        } = blocker;

        let worker = Worker {
            cfg,
            table,
            clock,
            notifier,
            events: self.events.clone(),
            state: state_tx,
            stop: self.stop.clone(),
        };
        let run = async move {
            let span = info_span!("session", id = %session_id);
            worker.run().instrument(span).await
        };
        self.join = Some(match dispatch {
            Some(dispatch) => tokio::spawn(run.with_subscriber(dispatch)),
            None => tokio::spawn(run),
        });
        Ok(())
    }

    /// Request a stop. No-op before `start` and after the session has finished.
    pub fn stop(&self) {
        if self.join.is_none() && self.outcome.is_none() {
            return;
        }
        if self.status().is_terminal() {
            return;
        }
        self.stop.request();
    }

    pub fn status(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Wait for the session to end. Repeated calls return the same outcome.
    pub async fn wait(&mut self) -> Result<RunOutcome, BlockError> {
        if let Some(outcome) = &self.outcome {
            return Ok(outcome.clone());
        }
        let join = self.join.take().ok_or(BlockError::NotStarted)?;
        let outcome = match join.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Blocker worker failed: {}", e);
                RunOutcome::Failed(format!("worker task failed: {e}"))
            }
        };
        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for BlockerHandle {
    fn drop(&mut self) {
        // An abandoned session must not keep enforcing in the background.
        self.stop.request();
    }
}

/// State owned exclusively by the worker task.
struct Worker {
    cfg: BlockConfig,
    table: Arc<dyn ProcessTable>,
    clock: Arc<dyn Clock>,
    notifier: NotifySink,
    events: broadcast::Sender<BlockerEvent>,
    state: watch::Sender<RunState>,
    stop: Arc<StopSignal>,
}

impl Worker {
    async fn run(self) -> RunOutcome {
        let outcome = self.drive().await;
        self.finish(outcome)
    }

    async fn drive(&self) -> RunOutcome {
        if let Err(e) = self.cfg.validate() {
            return RunOutcome::Failed(e.to_string());
        }
        // Path normalization touches the filesystem.
        let cfg = self.cfg.clone();
        let denylist =
            match tokio::task::spawn_blocking(move || sweep::Denylist::from_config(&cfg)).await {
                Ok(denylist) => denylist,
                Err(e) => return RunOutcome::Failed(format!("failed to prepare denylist: {e}")),
            };
        let mut attempts: u64 = 0;

        if let Some(at) = self.cfg.start_at {
            let (target, wait) = match schedule::countdown(at, self.clock.now()) {
                Ok(v) => v,
                Err(e) => return RunOutcome::Failed(e.to_string()),
            };
            let label = format_local(target);
            info!("Scheduled to start blocking at {}", label);
            self.emit(BlockerEvent::Scheduled { at: label.clone() });
            self.notify(&format!("Blocking scheduled at {label}"));
            self.enter(RunState::CountingDown);

            let deadline = Instant::now() + wait;
            loop {
                if self.stop.is_requested() {
                    return RunOutcome::Stopped;
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                self.emit(BlockerEvent::Stats(StatsUpdate {
                    phase: RunState::CountingDown,
                    seconds_remaining: remaining.as_secs(),
                    blocked_this_tick: 0,
                    cumulative_attempts: attempts,
                }));
                if self.stop.sleep(self.cfg.poll_interval.min(remaining)).await {
                    return RunOutcome::Stopped;
                }
            }
        }

        if self.stop.is_requested() {
            return RunOutcome::Stopped;
        }
        self.enter(RunState::Enforcing);
        let minutes = self.cfg.duration_minutes();
        info!(
            "Started blocking applications for {} minutes ({} path(s), {} name(s)).",
            minutes,
            self.cfg.paths.len(),
            self.cfg.names.len()
        );
        self.notify(&format!(
            "Started blocking applications for {minutes} minutes."
        ));

        let end = Instant::now() + self.cfg.duration;
        while Instant::now() < end {
            if self.stop.is_requested() {
                return RunOutcome::Stopped;
            }
            let report = sweep::sweep(
                &self.table,
                &denylist,
                EXIT_TIMEOUT,
                || self.stop.is_requested(),
                |ev| self.on_sweep_event(ev),
            )
            .await;
            attempts += report.attempts;

            let remaining = end.saturating_duration_since(Instant::now());
            self.emit(BlockerEvent::Stats(StatsUpdate {
                phase: RunState::Enforcing,
                seconds_remaining: remaining.as_secs(),
                blocked_this_tick: report.blocked,
                cumulative_attempts: attempts,
            }));
            if self.stop.sleep(self.cfg.poll_interval.min(remaining)).await {
                return RunOutcome::Stopped;
            }
        }

        RunOutcome::Completed
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        match &outcome {
            RunOutcome::Completed => {
                info!("Finished blocking applications.");
                self.notify("Finished blocking applications.");
            }
            RunOutcome::Stopped => {
                info!("Blocking stopped by user.");
                self.notify("Blocking session stopped by user.");
            }
            RunOutcome::Failed(reason) => {
                error!("Blocking session failed: {}", reason);
                self.notify(reason);
            }
        }
        self.state.send_replace(outcome.state());
        self.emit(BlockerEvent::Finished(outcome.clone()));
        outcome
    }

    fn on_sweep_event(&self, ev: SweepEvent) {
        match ev {
            SweepEvent::Terminated { pid, name } => {
                self.notify(&format!("Terminated {name} (PID: {pid})."));
                self.emit(BlockerEvent::Terminated { pid, name });
            }
            SweepEvent::SoftFailure { pid, name, reason } => {
                self.emit(BlockerEvent::SoftFailure {
                    pid,
                    name,
                    reason: reason.to_string(),
                });
            }
        }
    }

    fn enter(&self, state: RunState) {
        self.state.send_replace(state);
        self.emit(BlockerEvent::PhaseStarted { phase: state });
    }

    fn emit(&self, ev: BlockerEvent) {
        // No subscribers is fine; the session runs regardless.
        let _ = self.events.send(ev);
    }

    fn notify(&self, message: &str) {
        if self.cfg.notify {
            self.notifier.notify(NOTIFY_TITLE, message);
        }
    }
}

fn format_local(at: time::OffsetDateTime) -> String {
    let fmt = time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    at.format(&fmt).unwrap_or_else(|_| at.to_string())
}

#[cfg(test)]
mod tests {
    use super::schedule::tests::FixedClock;
    use super::*;
    use crate::model::{StartTime, DEFAULT_POLL_INTERVAL};
    use crate::notify::tests::RecordingNotifier;
    use crate::process::fake::{Behavior, FakeProcessTable};
    use std::collections::BTreeSet;
    use time::macros::datetime;

    fn config(names: &[&str]) -> BlockConfig {
        BlockConfig {
            paths: BTreeSet::new(),
            names: names.iter().map(|n| n.to_string()).collect(),
            duration: Duration::from_secs(60),
            start_at: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notify: false,
        }
    }

    fn handle(cfg: BlockConfig, table: Arc<FakeProcessTable>) -> BlockerHandle {
        BlockerHandle::new(
            Blocker::new(cfg)
                .with_process_table(table)
                .with_clock(Arc::new(FixedClock(datetime!(2026-10-18 09:59:58 UTC)))),
        )
    }

    fn drain(rx: &mut broadcast::Receiver<BlockerEvent>) -> Vec<BlockerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    fn stats(events: &[BlockerEvent]) -> Vec<StatsUpdate> {
        events
            .iter()
            .filter_map(|ev| match ev {
                BlockerEvent::Stats(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    fn finished(events: &[BlockerEvent]) -> Vec<RunOutcome> {
        events
            .iter()
            .filter_map(|ev| match ev {
                BlockerEvent::Finished(o) => Some(o.clone()),
                _ => None,
            })
            .collect()
    }

    async fn until_enforcing(rx: &mut broadcast::Receiver<BlockerEvent>) {
        loop {
            if let BlockerEvent::Stats(StatsUpdate {
                phase: RunState::Enforcing,
                ..
            }) = rx.recv().await.unwrap()
            {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blocks_named_process_then_completes() {
        let table = Arc::new(FakeProcessTable::new());
        table.spawn(42, Some("calc"), None, Behavior::Obliging);
        let mut handle = handle(config(&["calc"]), table.clone());
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        assert_eq!(handle.status(), RunState::Completed);

        let events = drain(&mut rx);
        let ticks = stats(&events);
        assert_eq!(ticks.len(), 60);
        assert!((59..=60).contains(&ticks[0].seconds_remaining));
        assert_eq!(ticks[0].blocked_this_tick, 1);
        assert_eq!(ticks[0].cumulative_attempts, 1);
        assert!(ticks[1..]
            .iter()
            .all(|t| t.blocked_this_tick == 0 && t.cumulative_attempts == 1));
        assert!(ticks.windows(2).all(|w| w[0].seconds_remaining > w[1].seconds_remaining));
        assert_eq!(table.terminated(), vec![42]);

        assert_eq!(finished(&events), vec![RunOutcome::Completed]);
        assert!(matches!(events.last(), Some(BlockerEvent::Finished(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cumulative_attempts_is_running_sum_of_blocks() {
        let table = Arc::new(FakeProcessTable::new());
        table
            .spawn(1, Some("calc"), None, Behavior::Respawning)
            .spawn(2, Some("Steam"), None, Behavior::Obliging)
            .spawn(3, Some("bash"), None, Behavior::Obliging);
        let mut handle = handle(config(&["calc", "steam"]), table.clone());
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        handle.wait().await.unwrap();

        let ticks = stats(&drain(&mut rx));
        let mut sum = 0;
        for t in &ticks {
            sum += u64::from(t.blocked_this_tick);
            assert_eq!(t.cumulative_attempts, sum);
        }
        assert_eq!(ticks[0].blocked_this_tick, 2);
        assert_eq!(sum, 61);
        assert!(table.alive(3));
    }

    #[tokio::test(start_paused = true)]
    async fn counts_down_before_enforcing() {
        let table = Arc::new(FakeProcessTable::new());
        let mut cfg = config(&["calc"]);
        cfg.start_at = Some(StartTime::new(10, 0).unwrap());
        let mut handle = handle(cfg, table);
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        handle.wait().await.unwrap();
        let events = drain(&mut rx);

        assert!(matches!(
            &events[0],
            BlockerEvent::Scheduled { at } if at == "2026-10-18 10:00:00"
        ));
        let ticks = stats(&events);
        let countdown: Vec<u64> = ticks
            .iter()
            .take_while(|t| t.phase == RunState::CountingDown)
            .map(|t| t.seconds_remaining)
            .collect();
        assert_eq!(countdown, vec![2, 1]);
        assert_eq!(ticks[2].phase, RunState::Enforcing);
        assert!(ticks[2..].iter().all(|t| t.phase == RunState::Enforcing));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_countdown_skips_enforcement() {
        let table = Arc::new(FakeProcessTable::new());
        table.spawn(5, Some("calc"), None, Behavior::Obliging);
        let mut cfg = config(&["calc"]);
        cfg.start_at = Some(StartTime::new(10, 0).unwrap());
        let mut handle = handle(cfg, table.clone());
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        loop {
            if let BlockerEvent::Stats(_) = rx.recv().await.unwrap() {
                break;
            }
        }
        assert_eq!(handle.status(), RunState::CountingDown);
        handle.stop();

        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Stopped);
        let events = drain(&mut rx);
        assert!(!events.contains(&BlockerEvent::PhaseStarted {
            phase: RunState::Enforcing
        }));
        assert!(table.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_finishes_once() {
        let table = Arc::new(FakeProcessTable::new());
        let mut handle = handle(config(&["calc"]), table);
        let mut rx = handle.subscribe();

        handle.stop();
        assert_eq!(handle.status(), RunState::Idle);

        handle.start().unwrap();
        until_enforcing(&mut rx).await;
        handle.stop();
        handle.stop();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Stopped);
        handle.stop();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Stopped);

        assert_eq!(finished(&drain(&mut rx)), vec![RunOutcome::Stopped]);
        assert_eq!(handle.status(), RunState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_after_completion_has_no_effect() {
        let table = Arc::new(FakeProcessTable::new());
        let mut handle = handle(config(&["calc"]), table);
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Completed);
        handle.stop();
        assert_eq!(handle.status(), RunState::Completed);
        assert_eq!(finished(&drain(&mut rx)), vec![RunOutcome::Completed]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_takes_effect_within_interval_plus_exit_timeout() {
        let table = Arc::new(FakeProcessTable::new());
        table.spawn(9, Some("calc"), None, Behavior::Stubborn);
        let mut cfg = config(&["calc"]);
        cfg.poll_interval = Duration::from_secs(5);
        let mut handle = handle(cfg, table);

        handle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let requested = Instant::now();
        handle.stop();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Stopped);
        assert!(requested.elapsed() <= Duration::from_secs(5) + EXIT_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_bounded_with_many_stubborn_processes() {
        let table = Arc::new(FakeProcessTable::new());
        for pid in 1..=4 {
            table.spawn(pid, Some("calc"), None, Behavior::Stubborn);
        }
        let mut handle = handle(config(&["calc"]), table.clone());
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        let requested = Instant::now();
        handle.stop();
        assert_eq!(handle.wait().await.unwrap(), RunOutcome::Stopped);
        assert!(requested.elapsed() <= DEFAULT_POLL_INTERVAL + EXIT_TIMEOUT);

        // Only the process already signalled when the stop arrived was attempted.
        assert_eq!(table.terminated(), vec![1]);
        let ticks = stats(&drain(&mut rx));
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].cumulative_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_fails_before_enumerating() {
        let table = Arc::new(FakeProcessTable::new());
        table.spawn(1, Some("calc"), None, Behavior::Obliging);
        let mut cfg = config(&["calc"]);
        cfg.poll_interval = Duration::ZERO;
        let mut handle = handle(cfg, table.clone());
        let mut rx = handle.subscribe();

        handle.start().unwrap();
        let outcome = handle.wait().await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed(ref r) if r.contains("poll interval")));
        assert_eq!(handle.status(), RunState::Failed);

        let events = drain(&mut rx);
        assert!(stats(&events).is_empty());
        assert_eq!(events.len(), 1);
        assert!(table.terminated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_rejected() {
        let mut handle = handle(config(&["calc"]), Arc::new(FakeProcessTable::new()));
        assert!(matches!(handle.wait().await, Err(BlockError::NotStarted)));
        handle.start().unwrap();
        assert!(matches!(handle.start(), Err(BlockError::AlreadyStarted)));
        handle.stop();
        handle.wait().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn notifies_lifecycle_when_enabled() {
        let table = Arc::new(FakeProcessTable::new());
        table.spawn(77, Some("calc"), None, Behavior::Obliging);
        let mut cfg = config(&["calc"]);
        cfg.notify = true;
        cfg.start_at = Some(StartTime::new(10, 0).unwrap());
        let (backend, notes) = RecordingNotifier::new();
        let mut handle = BlockerHandle::new(
            Blocker::new(cfg)
                .with_process_table(table)
                .with_clock(Arc::new(FixedClock(datetime!(2026-10-18 09:59:58 UTC))))
                .with_notifier(NotifySink::spawn(backend)),
        );

        handle.start().unwrap();
        handle.wait().await.unwrap();

        let messages: Vec<String> = (0..4)
            .map(|_| {
                notes
                    .recv_timeout(std::time::Duration::from_secs(2))
                    .unwrap()
                    .1
            })
            .collect();
        assert_eq!(
            messages,
            [
                "Blocking scheduled at 2026-10-18 10:00:00",
                "Started blocking applications for 1 minutes.",
                "Terminated calc (PID: 77).",
                "Finished blocking applications.",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_subscriber_still_sees_finish() {
        let table = Arc::new(FakeProcessTable::new());
        let mut handle = BlockerHandle::new(
            Blocker::new(config(&["calc"]))
                .with_process_table(table)
                .with_event_capacity(4),
        );
        let mut rx = handle.subscribe();
        handle.start().unwrap();
        handle.wait().await.unwrap();

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        let rest = drain(&mut rx);
        assert_eq!(rest.len(), 4);
        assert_eq!(
            rest.last(),
            Some(&BlockerEvent::Finished(RunOutcome::Completed))
        );
    }
}
