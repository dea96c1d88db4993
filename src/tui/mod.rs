mod help;

use crate::model::{BlockConfig, BlockerEvent, RunOutcome, RunState};
use crate::orchestrator::{self, SessionDeps, SessionView, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph, Sparkline, Tabs},
    Terminal,
};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

struct UiState {
    tab: usize,
    view: SessionView,
    /// Length of the countdown, taken from its first update.
    countdown_total: Option<u64>,
    enforce_total: u64,
    targets: String,
    stop_sent: bool,
}

impl UiState {
    fn new(cfg: &BlockConfig) -> Self {
        let mut targets: Vec<String> = cfg.names.iter().cloned().collect();
        targets.extend(cfg.paths.iter().map(|p| p.display().to_string()));
        Self {
            tab: 0,
            view: SessionView::default(),
            countdown_total: None,
            enforce_total: cfg.duration.as_secs(),
            targets: targets.join(", "),
            stop_sent: false,
        }
    }

    fn apply(&mut self, ev: &BlockerEvent) {
        if let BlockerEvent::Stats(s) = ev {
            if s.phase == RunState::CountingDown && self.countdown_total.is_none() {
                self.countdown_total = Some(s.seconds_remaining.max(1));
            }
        }
        self.view.apply(ev);
    }

    fn ratio(&self) -> f64 {
        match self.view.state {
            RunState::CountingDown => self
                .countdown_total
                .map(|total| self.view.progress(total))
                .unwrap_or(0.0),
            RunState::Enforcing => self.view.progress(self.enforce_total),
            RunState::Completed => 1.0,
            _ => 0.0,
        }
    }

    fn finished(&self) -> bool {
        self.view.outcome.is_some()
    }
}

pub(crate) async fn run(cfg: BlockConfig, deps: SessionDeps) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<BlockerEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_cfg = cfg.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_cfg, event_rx, cmd_tx));

    let res = orchestrator::run_controller(cfg.clone(), deps, event_tx, cmd_rx).await;

    let view = match tokio::task::spawn_blocking(move || ui_handle.join()).await {
        Ok(Ok(Ok(view))) => view,
        Ok(Ok(Err(e))) => return Err(e),
        Ok(Err(_)) => return Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => return Err(e).context("join TUI thread"),
    };

    let report = res?;
    let summary = crate::text_summary::build_text_summary(Some(&report.session_id), &cfg, &view);
    for line in summary.lines {
        println!("{line}");
    }
    match report.outcome {
        RunOutcome::Failed(reason) => Err(anyhow::anyhow!(reason)),
        RunOutcome::Completed | RunOutcome::Stopped => Ok(()),
    }
}

/// Run the TUI loop on a dedicated thread. Returns the final session view.
fn run_threaded(
    cfg: BlockConfig,
    mut event_rx: UnboundedReceiver<BlockerEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<SessionView> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(&cfg);
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        while let Ok(ev) = event_rx.try_recv() {
            state.apply(&ev);
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Stop);
                        break Ok(());
                    }
                    (_, KeyCode::Char('s')) => {
                        if state.finished() {
                            state.view.info = "Session already finished; press q to quit".into();
                        } else if !state.stop_sent {
                            let _ = cmd_tx.send(UiCommand::Stop);
                            state.stop_sent = true;
                        }
                    }
                    (_, KeyCode::Tab) => {
                        state.tab = (state.tab + 1) % 2;
                    }
                    (_, KeyCode::Char('?')) => {
                        state.tab = 1;
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();

    // The controller keeps forwarding until the worker finishes; take what is already queued.
    while let Ok(ev) = event_rx.try_recv() {
        state.apply(&ev);
    }
    res.map(|()| state.view)
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![Line::from("Dashboard"), Line::from("Help")])
        .select(state.tab)
        .block(Block::default().borders(Borders::ALL).title("app-blocker"))
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_dashboard(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn phase_color(phase: RunState) -> Color {
    match phase {
        RunState::CountingDown => Color::Yellow,
        RunState::Enforcing => Color::Red,
        RunState::Completed => Color::Green,
        RunState::Stopped => Color::Blue,
        RunState::Failed => Color::Magenta,
        RunState::Idle => Color::Gray,
    }
}

fn draw_dashboard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3), // Time gauge
                Constraint::Length(5), // Counters + blocked sparkline
                Constraint::Min(0),    // Activity
                Constraint::Length(3), // Status
            ]
            .as_ref(),
        )
        .split(area);

    let view = &state.view;
    let color = phase_color(view.state);
    let gauge = Gauge::default()
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{:?}", view.state)),
        )
        .gauge_style(Style::default().fg(color))
        .ratio(state.ratio().clamp(0.0, 1.0))
        .label(view.time_label());
    f.render_widget(gauge, main[0]);

    let row = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)].as_ref())
        .split(main[1]);

    let counters = Paragraph::new(vec![
        Line::from(Span::styled(
            view.blocked_label(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(view.attempts_label()),
        Line::from(format!(
            "Exited: {}   Failures: {}",
            view.exited, view.failures
        )),
    ])
    .block(Block::default().borders(Borders::ALL).title("Stats"));
    f.render_widget(counters, row[0]);

    f.render_widget(
        Sparkline::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("Blocked per check ({} checks)", view.ticks)),
            )
            .data(&view.blocked_history)
            .style(Style::default().fg(Color::Red)),
        row[1],
    );

    let items: Vec<ListItem> = view
        .activity
        .iter()
        .map(|line| ListItem::new(line.as_str()))
        .collect();
    let activity = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Activity | blocking: {}", state.targets)),
    );
    f.render_widget(activity, main[2]);

    let mut status = vec![Span::raw(view.info.clone())];
    if let Some(at) = &view.scheduled_at {
        status.push(Span::styled(
            format!("  (scheduled {at})"),
            Style::default().fg(Color::DarkGray),
        ));
    }
    let hint = if state.finished() {
        "q quit"
    } else {
        "s stop | q stop & quit"
    };
    let p = Paragraph::new(Line::from(status)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Status")
            .title_bottom(hint),
    );
    f.render_widget(p, main[3]);
}
