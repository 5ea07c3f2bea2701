use std::collections::VecDeque;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use std::{
    any::Any,
    sync::mpsc::{self, Receiver, TryRecvError},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::error::ManagerError;
use crate::library::Library;
use crate::manager::{ProgressEvent, ProgressSink};

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Download,
    Extract,
}

impl Operation {
    fn label(self) -> &'static str {
        match self {
            Operation::Download => "Download",
            Operation::Extract => "Extract",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolve,
    Login,
    Download,
    Extract,
    Place,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Resolve => "Resolve",
            Phase::Login => "Login",
            Phase::Download => "Download",
            Phase::Extract => "Extract",
            Phase::Place => "Place",
        }
    }

    fn index(self) -> usize {
        match self {
            Phase::Resolve => 0,
            Phase::Login => 1,
            Phase::Download => 2,
            Phase::Extract => 3,
            Phase::Place => 4,
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
    active: bool,
    finished: bool,
    items_started: u32,
    relogins: u32,
    library_items: Option<usize>,
}

pub struct Tui {
    operation: Operation,
    state: Arc<Mutex<AppState>>,
    show_logs: bool,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                if phase == Phase::Download && !payload.contains("files=") {
                    state.items_started = state.items_started.saturating_add(1);
                }
                if phase == Phase::Login {
                    state.relogins = state.relogins.saturating_add(1);
                }
                state.phase = phase;
                state.status = payload.to_string();
            } else {
                state.status = message.clone();
            }

            let line = match event.elapsed {
                Some(elapsed) => format!(
                    "[{}] {message} ({:.1}s)",
                    timestamp(),
                    elapsed.as_secs_f64()
                ),
                None => format!("[{}] {message}", timestamp()),
            };
            push_bounded(&mut state.events, message, EVENTS_MAX);
            push_bounded(&mut state.logs, line, LOGS_MAX);
        }
    }
}

impl Tui {
    /// `root` is the management directory, used for the header summary.
    pub fn new(operation: Operation, root: Option<&Path>, watched_dir: &str) -> Self {
        let library_items = root
            .and_then(|root| Library::scan(root, watched_dir).ok())
            .map(|library| library.len());
        Self {
            operation,
            state: Arc::new(Mutex::new(AppState {
                status: "ready".to_string(),
                phase: Phase::Resolve,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
                active: false,
                finished: false,
                items_started: 0,
                relogins: 0,
                library_items,
            })),
            show_logs: false,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. `q` or Esc
    /// aborts the wait.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, ManagerError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let mut worker = Some(thread::spawn(move || {
            let _ = tx.send(f(&sink));
        }));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                let elapsed = state.started.elapsed();
                terminal
                    .draw(|frame| draw_ui(frame, self, &state, tick, elapsed))
                    .into_diagnostic()?;
            }

            if let Some(outcome) = poll_worker(&rx, &mut worker) {
                self.set_active(false);
                restore_terminal()?;
                return outcome;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if self.handle_key(key) {
                        break;
                    }
                }
            }

            tick = tick.wrapping_add(1);
        }

        self.set_active(false);
        restore_terminal()?;
        Err(miette::Report::msg("aborted"))
    }

    /// Full screen yes/no question listing `lines`.
    pub fn confirm(title: &str, lines: &[String]) -> miette::Result<bool> {
        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        let confirmed = loop {
            terminal
                .draw(|frame| {
                    let block = Block::default()
                        .borders(Borders::ALL)
                        .title(title.to_string());
                    let mut text = lines
                        .iter()
                        .map(|line| Line::from(line.clone()))
                        .collect::<Vec<_>>();
                    text.push(Line::from(""));
                    text.push(Line::from(Span::styled(
                        "Press y to confirm, n to cancel.",
                        Style::default().fg(Color::Yellow),
                    )));
                    let view = Paragraph::new(text)
                        .alignment(Alignment::Left)
                        .block(block)
                        .wrap(Wrap { trim: false });
                    frame.render_widget(view, frame.area());
                })
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(100)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    match key.code {
                        KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                        _ => {}
                    }
                }
            }
        };

        restore_terminal()?;
        Ok(confirmed)
    }

    fn handle_key(&mut self, key: KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => true,
            KeyCode::Char('l') | KeyCode::F(4) => {
                self.show_logs = !self.show_logs;
                false
            }
            _ => false,
        }
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
                state.finished = false;
                state.phase = Phase::Resolve;
            } else {
                state.finished = true;
            }
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

/// `None` while the worker is still running. A worker that went away
/// without sending is joined so its panic message surfaces.
fn poll_worker<R>(
    rx: &Receiver<Result<R, ManagerError>>,
    worker: &mut Option<JoinHandle<()>>,
) -> Option<miette::Result<R>> {
    let outcome = match rx.try_recv() {
        Ok(result) => result.map_err(miette::Report::new),
        Err(TryRecvError::Empty) => return None,
        Err(TryRecvError::Disconnected) => {
            Err(miette::Report::msg("worker exited without a result"))
        }
    };
    if let Some(handle) = worker.take() {
        if let Err(payload) = handle.join() {
            return Some(Err(miette::Report::msg(format!(
                "worker thread panicked: {}",
                panic_message(payload.as_ref())
            ))));
        }
    }
    Some(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    tui: &Tui,
    state: &AppState,
    tick: usize,
    elapsed: Duration,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(8), Constraint::Length(1)])
        .split(frame.area());

    frame.render_widget(draw_header(state, tui.operation, tick), chunks[0]);
    if tui.show_logs {
        frame.render_widget(draw_logs_view(state), chunks[1]);
    } else {
        frame.render_widget(draw_status_panel(state, elapsed), chunks[1]);
    }
    let footer = Paragraph::new(Line::from(Span::styled(
        "q quit   l logs",
        Style::default().fg(Color::Gray),
    )));
    frame.render_widget(footer, chunks[2]);
}

fn draw_header(state: &AppState, operation: Operation, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let header_line = Line::from(vec![
        Span::styled(
            "DLSM",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(operation.label(), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    let library = match state.library_items {
        Some(count) => format!("Library: {count} items"),
        None => "Library: not configured".to_string(),
    };
    let library_line = Line::from(Span::styled(library, Style::default().fg(Color::Gray)));
    Paragraph::new(vec![header_line, library_line])
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_status_panel(state: &AppState, elapsed: Duration) -> Paragraph<'static> {
    let progress = phase_progress(state.phase);
    let phase_color = if state.active {
        Color::Cyan
    } else if state.finished {
        Color::Green
    } else {
        Color::Yellow
    };
    let mut lines = vec![
        Line::from(Span::styled(
            "STATUS / PROGRESS",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<8} ", state.phase.label()),
                Style::default().fg(phase_color),
            ),
            Span::raw(progress_bar(progress)),
            Span::raw(format!(" {:>3}%", progress)),
        ]),
        Line::from(vec![
            Span::styled("Items: ", Style::default().fg(Color::Gray)),
            Span::raw(state.items_started.to_string()),
            Span::styled("   Re-logins: ", Style::default().fg(Color::Gray)),
            Span::raw(state.relogins.to_string()),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", elapsed.as_secs())),
        ]),
        Line::from(vec![
            Span::styled("Now: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
        Line::from(Span::styled(
            "Recent events:",
            Style::default().fg(Color::Gray),
        )),
    ];
    for event in state.events.iter().rev() {
        lines.push(Line::from(format!("- {event}")));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState) -> Paragraph<'static> {
    let lines = state
        .logs
        .iter()
        .map(|line| Line::from(line.clone()))
        .collect::<Vec<_>>();
    let scroll = lines.len().saturating_sub(20) as u16;
    Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Logs"))
        .scroll((scroll, 0))
}

fn phase_progress(phase: Phase) -> u8 {
    (((phase.index() + 1) as f64 / 5.0) * 100.0) as u8
}

fn progress_bar(percent: u8) -> String {
    let total = 10;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (name, payload) = rest.split_once(';')?;
    let phase = match name {
        "Resolve" => Phase::Resolve,
        "Login" => Phase::Login,
        "Download" => Phase::Download,
        "Extract" => Phase::Extract,
        "Place" => Phase::Place,
        _ => return None,
    };
    Some((phase, payload.trim()))
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let mins = (secs / 60) % 60;
    let hours = (secs / 3600) % 24;
    let seconds = secs % 60;
    format!("{hours:02}:{mins:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wait_for<R>(
        rx: &Receiver<Result<R, ManagerError>>,
        worker: &mut Option<JoinHandle<()>>,
    ) -> miette::Result<R> {
        loop {
            if let Some(outcome) = poll_worker(rx, worker) {
                return outcome;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn worker_result_is_returned() {
        let (tx, rx) = mpsc::channel();
        let mut worker = Some(thread::spawn(move || {
            let _ = tx.send(Ok::<_, ManagerError>(7));
        }));
        assert_eq!(wait_for(&rx, &mut worker).unwrap(), 7);
        assert!(worker.is_none());
    }

    #[test]
    fn panicking_worker_surfaces_its_message() {
        let (tx, rx) = mpsc::channel::<Result<(), ManagerError>>();
        let mut worker = Some(thread::spawn(move || {
            let _tx = tx;
            panic!("extractor blew up");
        }));
        let err = wait_for(&rx, &mut worker).unwrap_err();
        assert!(err.to_string().contains("extractor blew up"), "{err}");
    }

    #[test]
    fn parse_known_phases() {
        assert_eq!(
            parse_phase("phase=Download; item=RJ1"),
            Some((Phase::Download, "item=RJ1"))
        );
        assert_eq!(parse_phase("phase=Place; done"), Some((Phase::Place, "done")));
        assert_eq!(parse_phase("phase=Other; x"), None);
        assert_eq!(parse_phase("downloading"), None);
    }

    #[test]
    fn progress_bar_fills() {
        assert_eq!(progress_bar(0), "[..........]");
        assert_eq!(progress_bar(100), "[##########]");
        assert_eq!(progress_bar(phase_progress(Phase::Download)), "[######....]");
    }

    #[test]
    fn sink_counts_items_and_relogins() {
        let tui = Tui::new(Operation::Download, None, "watched");
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        for message in [
            "phase=Download; item=RJ1",
            "phase=Login; attempt=1",
            "phase=Download; item=RJ1 files=1",
        ] {
            sink.event(ProgressEvent {
                message: message.to_string(),
                elapsed: None,
            });
        }
        let state = tui.state.lock().unwrap();
        assert_eq!(state.items_started, 1);
        assert_eq!(state.relogins, 1);
        assert_eq!(state.phase, Phase::Download);
    }
}
