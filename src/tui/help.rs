use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame,
};

fn key(k: &'static str, pad: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(k, Style::default().fg(Color::Magenta)),
        Span::raw(pad),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key("s", "           ", "Stop blocking (stays open)"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Stop and quit"),
        ]),
        key("tab", "         ", "Switch tabs"),
        key("?", "           ", "Show this help"),
        Line::from(""),
        Line::from("Matching:"),
        Line::from("  Names are compared case-insensitively against the process name."),
        Line::from("  Paths must match the absolute executable path exactly."),
        Line::from("  Terminating processes owned by other users requires root."),
        Line::from(""),
        Line::from("Event log:"),
        Line::from("  --log-file PATH to change it, --no-log-file to disable it."),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
