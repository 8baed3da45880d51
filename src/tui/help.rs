use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

fn key_line(key: &'static str, what: &'static str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<12}"), Style::default().fg(Color::Magenta)),
        Span::raw(what),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        key_line("q / Ctrl-C", "Quit (refused while a run is in progress)"),
        key_line("tab", "Next tab (shift-tab: previous)"),
        key_line("↑/↓ or j/k", "Navigate"),
        key_line("s", "Synchronize now"),
        key_line("/", "Search the catalog (enter applies, esc cancels)"),
        key_line("r", "Reload catalog and devices"),
        key_line("l", "Log in as administrator"),
        key_line("?", "Show this help"),
        Line::from(""),
        Line::from("Applications tab:"),
        key_line("enter", "Install, or uninstall when installed"),
        key_line("i", "Install selected"),
        key_line("u", "Uninstall selected"),
        key_line("o", "Toggle only installed"),
        Line::from(""),
        Line::from("Devices tab:"),
        key_line("enter", "Assign or remove the selected device feature"),
        key_line("o", "Toggle only assigned"),
        Line::from(""),
        Line::from("Details tab:"),
        key_line("PgUp/PgDn", "Scroll the selected run"),
        key_line("e", "Export selected run as JSON"),
        key_line("y", "Copy exported path to clipboard"),
        Line::from(""),
        Line::from("Only one run executes at a time. Admin-only entries ask for credentials once per session."),
    ])
    .wrap(Wrap { trim: false })
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(p, area);
}
