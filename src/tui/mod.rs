mod export;
mod help;
mod state;

use crate::config::Settings;
use crate::markup::{self, Tone};
use crate::model::{NoticeLevel, Slot, UiEvent};
use crate::orchestrator::{self, ControllerConfig, UiCommand};
use crate::resolver::{AppState, DeviceState};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{LoginField, LoginPrompt, Tab, UiState};
use std::path::{Path, PathBuf};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

type Term = Terminal<CrosstermBackend<io::Stdout>>;

pub async fn run(cfg: ControllerConfig, settings: Settings) -> Result<()> {
    // Unbounded channels avoid backpressure between the controller and the UI thread.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<UiEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let state = UiState::new(&settings, cfg.window, cfg.filter.clone());
    let exports = cfg.paths.exports();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(state, exports, event_rx, cmd_tx));

    let res = orchestrator::run_controller(cfg, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

fn enter_screen() -> Result<Term> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();
    Ok(terminal)
}

fn leave_screen() {
    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
}

/// Run the TUI loop on a dedicated thread.
///
/// A hidden console only mirrors events; the terminal is taken over once the
/// console becomes visible. The loop ends when the controller goes away.
fn run_threaded(
    mut state: UiState,
    exports: PathBuf,
    mut event_rx: UnboundedReceiver<UiEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    let mut terminal: Option<Term> = None;
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = 'ui: loop {
        loop {
            match event_rx.try_recv() {
                Ok(ev) => {
                    if state.apply(ev) {
                        break 'ui Ok(());
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break 'ui Ok(()),
            }
        }

        if state.visible && terminal.is_none() {
            match enter_screen() {
                Ok(t) => terminal = Some(t),
                Err(e) => break Err(e),
            }
        }
        let Some(term) = terminal.as_mut() else {
            std::thread::sleep(Duration::from_millis(50));
            continue;
        };

        if last_tick.elapsed() >= tick_rate {
            state.expire_notice(Instant::now());
            term.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(&mut state, k, &cmd_tx, &exports) {
                    break Ok(());
                }
            }
        }
    };

    if terminal.is_some() {
        leave_screen();
    }
    res
}

/// Returns `true` when the UI must stop without waiting for the controller.
fn handle_key(
    state: &mut UiState,
    k: KeyEvent,
    cmd_tx: &UnboundedSender<UiCommand>,
    exports: &Path,
) -> bool {
    if let Some(prompt) = state.login.as_mut() {
        match k.code {
            KeyCode::Esc => state.login = None,
            KeyCode::Tab | KeyCode::BackTab => prompt.toggle_field(),
            KeyCode::Backspace => {
                prompt.input().pop();
            }
            KeyCode::Enter if prompt.field == LoginField::User => prompt.toggle_field(),
            KeyCode::Enter => {
                let _ = cmd_tx.send(UiCommand::Elevate {
                    user: std::mem::take(&mut prompt.user),
                    password: std::mem::take(&mut prompt.password),
                });
                state.login = None;
                state.info = "checking credentials...".into();
            }
            KeyCode::Char(c) => prompt.input().push(c),
            _ => {}
        }
        return false;
    }

    if state.search_editing {
        match k.code {
            KeyCode::Esc => {
                state.search_editing = false;
                state.search_input = state.filter.search.clone();
            }
            KeyCode::Enter => {
                state.search_editing = false;
                state.filter.search = state.search_input.trim().to_string();
                let _ = cmd_tx.send(UiCommand::Refresh(state.filter.clone()));
            }
            KeyCode::Backspace => {
                state.search_input.pop();
            }
            KeyCode::Char(c) => state.search_input.push(c),
            _ => {}
        }
        return false;
    }

    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
            // The controller refuses while busy and closes the event channel otherwise.
            return cmd_tx.send(UiCommand::Quit).is_err();
        }
        (_, KeyCode::Tab) => state.next_tab(),
        (_, KeyCode::BackTab) => state.prev_tab(),
        (_, KeyCode::Char('?')) => {
            state.show_tab(Tab::Help);
        }
        (_, KeyCode::Up) | (_, KeyCode::Char('k')) => state.move_selection(false),
        (_, KeyCode::Down) | (_, KeyCode::Char('j')) => state.move_selection(true),
        (_, KeyCode::PageUp) => state.detail_scroll = state.detail_scroll.saturating_sub(10),
        (_, KeyCode::PageDown) => state.detail_scroll = state.detail_scroll.saturating_add(10),
        (_, KeyCode::Char('s')) => {
            let _ = cmd_tx.send(UiCommand::Sync);
        }
        (_, KeyCode::Char('/')) => {
            state.search_editing = true;
            state.search_input = state.filter.search.clone();
        }
        (_, KeyCode::Char('r')) => {
            let _ = cmd_tx.send(UiCommand::Refresh(state.filter.clone()));
            state.info = "reloading...".into();
        }
        (_, KeyCode::Char('l')) => {
            if state.elevated {
                state.info = "already logged in as administrator".into();
            } else {
                state.login = Some(LoginPrompt::new("administrator"));
            }
        }
        (_, KeyCode::Char('o')) => match state.current_tab() {
            Tab::Applications => {
                state.filter.visibility.only_installed = !state.filter.visibility.only_installed;
                let _ = cmd_tx.send(UiCommand::Refresh(state.filter.clone()));
            }
            Tab::Devices => {
                state.filter.visibility.only_assigned = !state.filter.visibility.only_assigned;
                let _ = cmd_tx.send(UiCommand::Refresh(state.filter.clone()));
            }
            _ => {}
        },
        (_, KeyCode::Enter) => match state.current_tab() {
            Tab::Applications => {
                if let Some(app) = state.selected_app() {
                    let cmd = if app.state == AppState::Locked {
                        UiCommand::OnDemand(app.name.clone())
                    } else {
                        UiCommand::Activate(app.name.clone())
                    };
                    let _ = cmd_tx.send(cmd);
                }
            }
            Tab::Devices => {
                if let (Some(b), Some(bind)) = (state.selected_binding(), state.binding_toggle()) {
                    let key = b.key.clone();
                    let cmd = if bind {
                        UiCommand::BindDevice(key)
                    } else {
                        UiCommand::UnbindDevice(key)
                    };
                    let _ = cmd_tx.send(cmd);
                }
            }
            _ => {}
        },
        (_, KeyCode::Char('i')) if state.current_tab() == Tab::Applications => {
            if let Some(app) = state.selected_app() {
                let _ = cmd_tx.send(UiCommand::Install(app.name.clone()));
            }
        }
        (_, KeyCode::Char('u')) if state.current_tab() == Tab::Applications => {
            if let Some(app) = state.selected_app() {
                let _ = cmd_tx.send(UiCommand::Uninstall(app.name.clone()));
            }
        }
        (_, KeyCode::Char('e')) if state.current_tab() == Tab::Details => {
            if let Some((id, record)) = state.selected_run() {
                state.info = match export::export_run_json(exports, id, record) {
                    Ok(p) => {
                        state.last_exported_path = Some(p.to_string_lossy().to_string());
                        format!("Exported JSON: {} (press 'y' to copy path)", p.display())
                    }
                    Err(e) => format!("JSON export failed: {e:#}"),
                };
            }
        }
        (_, KeyCode::Char('y')) if state.current_tab() == Tab::Details => {
            state.info = match state.last_exported_path.as_deref() {
                Some(path) => match export::copy_to_clipboard(path) {
                    Ok(()) => format!("✓ Copied to clipboard: {path}"),
                    Err(e) => format!("Clipboard copy failed: {e:#}"),
                },
                None => "No exported file path to copy. Export a run first (e)".into(),
            };
        }
        _ => {}
    }
    false
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);

    let mut title = String::from("migasfree-play");
    if let Some(label) = &state.label {
        title.push_str(&format!(" · {} (CID-{})", label.name, label.id));
    }
    if state.elevated {
        title.push_str(" · admin");
    }
    if state.is_busy(&Slot::sync()) {
        title.push_str(" · synchronizing");
    }

    let tabs = Tabs::new(
        state
            .tabs
            .iter()
            .map(|t| Line::from(t.title()))
            .collect::<Vec<_>>(),
    )
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title(title))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.current_tab() {
        Tab::Applications => draw_apps(chunks[1], f, state),
        Tab::Devices => draw_devices(chunks[1], f, state),
        Tab::Details => draw_details(chunks[1], f, state),
        Tab::Help => help::draw_help(chunks[1], f),
    }

    draw_status(chunks[2], f, state);

    if let Some(prompt) = &state.login {
        draw_login(area, f, prompt);
    }
}

fn selected_style() -> Style {
    Style::default().add_modifier(Modifier::REVERSED)
}

/// Row count as a scroll offset, saturating at the widget limit.
fn rows(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

/// First visible row so that `selected` stays on screen.
fn scroll_for(selected: usize, height: u16) -> u16 {
    let visible = usize::from(height.saturating_sub(2).max(1));
    rows(selected.saturating_sub(visible - 1))
}

fn app_marker(state: AppState) -> Span<'static> {
    match state {
        AppState::Installed => Span::styled("● installed    ", Style::default().fg(Color::Green)),
        AppState::Installable => Span::styled("○ installable  ", Style::default().fg(Color::White)),
        AppState::RequiresAuth => {
            Span::styled("◆ requires auth", Style::default().fg(Color::Yellow))
        }
        AppState::Locked => Span::styled("✕ not available", Style::default().fg(Color::DarkGray)),
    }
}

fn draw_apps(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(60), Constraint::Percentage(40)])
        .split(area);

    let mut title = format!("Applications ({})", state.apps.len());
    if !state.filter.search.is_empty() {
        title.push_str(&format!(" search: {}", state.filter.search));
    }
    if state.filter.visibility.only_installed {
        title.push_str(" [only installed]");
    }

    let lines: Vec<Line> = state
        .apps
        .iter()
        .enumerate()
        .map(|(i, app)| {
            let mut spans = vec![
                app_marker(app.state),
                Span::raw("  "),
                Span::styled(app.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
                Span::styled(
                    format!("  {}", app.category),
                    Style::default().fg(Color::DarkGray),
                ),
            ];
            if state.is_busy(&Slot::action(&app.name)) {
                spans.push(Span::styled("  running…", Style::default().fg(Color::Cyan)));
            }
            let line = Line::from(spans);
            if i == state.app_selected {
                line.style(selected_style())
            } else {
                line
            }
        })
        .collect();

    let list = if lines.is_empty() {
        Paragraph::new("No applications.")
    } else {
        Paragraph::new(lines).scroll((scroll_for(state.app_selected, cols[0].height), 0))
    };
    f.render_widget(
        list.block(Block::default().borders(Borders::ALL).title(title)),
        cols[0],
    );

    let detail = match state.selected_app() {
        Some(app) => {
            let mut lines = vec![
                Line::from(Span::styled(
                    app.name.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("Category: {}", app.category)),
                Line::from(format!("State: {}", app.state.label())),
                Line::from(format!("Packages: {}", app.packages.join(" "))),
            ];
            if app.level == crate::model::AuthLevel::RequiresAdmin {
                lines.push(Line::from(Span::styled(
                    "Administrator credentials required",
                    Style::default().fg(Color::Yellow),
                )));
            }
            if !app.summary.is_empty() {
                lines.push(Line::from(""));
                lines.extend(app.summary.lines().map(|l| Line::from(l.to_string())));
            }
            Paragraph::new(lines)
        }
        None => Paragraph::new(""),
    };
    f.render_widget(
        detail
            .wrap(Wrap { trim: false })
            .block(Block::default().borders(Borders::ALL).title("Details")),
        cols[1],
    );
}

fn device_state_style(state: DeviceState) -> Style {
    match state {
        DeviceState::Assigned => Style::default().fg(Color::Green),
        DeviceState::Inflicted => Style::default().fg(Color::Magenta),
        DeviceState::Available => Style::default().fg(Color::White),
    }
}

fn draw_devices(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = Vec::new();
    let mut selected_row = 0;
    let mut flat = 0;
    for dev in &state.devices {
        let mut head = vec![
            Span::styled(dev.name.clone(), Style::default().add_modifier(Modifier::BOLD)),
            Span::raw(format!("  {} ({})", dev.model, dev.connection)),
        ];
        if let Some(location) = &dev.location {
            head.push(Span::styled(
                format!("  @ {location}"),
                Style::default().fg(Color::DarkGray),
            ));
        }
        lines.push(Line::from(head));
        for b in &dev.bindings {
            let line = Line::from(vec![
                Span::raw(format!("    {:<24}", b.name)),
                Span::styled(b.state.label(), device_state_style(b.state)),
            ]);
            if flat == state.binding_selected {
                selected_row = lines.len();
                lines.push(line.style(selected_style()));
            } else {
                lines.push(line);
            }
            flat += 1;
        }
    }

    let mut title = format!("Devices ({})", state.devices.len());
    if state.filter.visibility.only_assigned {
        title.push_str(" [only assigned]");
    }
    let p = if lines.is_empty() {
        Paragraph::new("No devices.")
    } else {
        Paragraph::new(lines).scroll((scroll_for(selected_row, area.height), 0))
    };
    f.render_widget(p.block(Block::default().borders(Borders::ALL).title(title)), area);
}

fn tone_style(tone: Option<Tone>) -> Style {
    match tone {
        None => Style::default(),
        Some(Tone::Section) => Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        Some(Tone::Warning) => Style::default().fg(Color::Yellow),
        Some(Tone::Error) => Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        Some(Tone::Info) => Style::default().fg(Color::Blue),
        Some(Tone::Stderr) => Style::default().fg(Color::LightRed),
    }
}

fn markup_to_lines(body: &str, width: u16) -> Vec<Line<'static>> {
    markup::lines(body)
        .into_iter()
        .map(|line| {
            if line.separator {
                return Line::from(Span::styled(
                    "─".repeat(width.saturating_sub(2) as usize),
                    Style::default().fg(Color::DarkGray),
                ));
            }
            Line::from(
                line.segments
                    .into_iter()
                    .map(|s| Span::styled(s.text, tone_style(s.tone)))
                    .collect::<Vec<_>>(),
            )
        })
        .collect()
}

fn draw_details(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(44), Constraint::Min(0)])
        .split(area);

    let runs: Vec<Line> = state
        .runs()
        .enumerate()
        .map(|(i, (id, record))| {
            let line = Line::from(format!(
                "{:>4} {:<7} {} {}",
                id.to_string(),
                record.icon.as_str(),
                record.date,
                record.header
            ));
            if i == state.run_selected {
                line.style(selected_style())
            } else {
                line
            }
        })
        .collect();
    f.render_widget(
        Paragraph::new(runs)
            .scroll((scroll_for(state.run_selected, cols[0].height), 0))
            .block(Block::default().borders(Borders::ALL).title("Runs")),
        cols[0],
    );

    let Some((id, record)) = state.selected_run() else {
        f.render_widget(
            Paragraph::new("Nothing has run yet.")
                .block(Block::default().borders(Borders::ALL).title("Output")),
            cols[1],
        );
        return;
    };
    let body = markup_to_lines(&record.body, cols[1].width);
    let visible = cols[1].height.saturating_sub(2);
    let bottom = rows(body.len()).saturating_sub(visible);
    // The newest run follows its output while something is running.
    let scroll = if state.run_selected == 0 && !state.busy.is_empty() {
        bottom
    } else {
        state.detail_scroll.min(bottom)
    };
    f.render_widget(
        Paragraph::new(body)
            .scroll((scroll, 0))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(format!("{} {} {}", id, record.header, record.date)),
            ),
        cols[1],
    );
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let line = if state.search_editing {
        Line::from(vec![
            Span::styled("search: ", Style::default().fg(Color::Magenta)),
            Span::raw(format!("{}_", state.search_input)),
        ])
    } else if let Some((notice, _)) = &state.notice {
        let color = match notice.level {
            NoticeLevel::Info => Color::Cyan,
            NoticeLevel::Success => Color::Green,
            NoticeLevel::Warning => Color::Yellow,
            NoticeLevel::Error => Color::Red,
        };
        Line::from(Span::styled(notice.text.clone(), Style::default().fg(color)))
    } else {
        Line::from(Span::styled(
            state.info.clone(),
            Style::default().fg(Color::Gray),
        ))
    };
    f.render_widget(Paragraph::new(line), area);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let w = width.min(area.width);
    let h = height.min(area.height);
    Rect {
        x: area.x + (area.width - w) / 2,
        y: area.y + (area.height - h) / 2,
        width: w,
        height: h,
    }
}

fn draw_login(area: Rect, f: &mut ratatui::Frame, prompt: &LoginPrompt) {
    let popup = centered(area, 50, 7);
    let field = |name: &str, value: String, active: bool| {
        let style = if active {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        Line::from(vec![
            Span::styled(format!("{name:<10}"), style),
            Span::raw(value),
            Span::raw(if active { "_" } else { "" }),
        ])
    };
    let lines = vec![
        Line::from(format!("{} requires administrator credentials", prompt.label)),
        Line::from(""),
        field("user", prompt.user.clone(), prompt.field == LoginField::User),
        field(
            "password",
            "*".repeat(prompt.password.chars().count()),
            prompt.field == LoginField::Password,
        ),
    ];
    f.render_widget(Clear, popup);
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Login")),
        popup,
    );
}
