use crate::config::{Config, get_default_config_path};
use crate::error::FetchError;
use crate::fetch::{FetchEvent, FetchOrchestrator};
use crate::git::{RepoInspector, RepoReport, RepoState};
use crate::runner::CommandRunner;
use crate::snapshot::{Scanner, Snapshot, StateCounts};
use crate::store::{FetchStatus, ResultStore};
use anyhow::Result;
use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, unbounded};
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    prelude::Stylize,
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long a finished fetch summary (or a one-off notice) stays visible.
pub const STATUS_LINGER: Duration = Duration::from_secs(5);

const MAX_LABEL_WIDTH: usize = 48;
const BRANCH_WIDTH: usize = 24;

pub struct App {
    pub should_quit: bool,
    pub config: Config,
    config_path: Option<PathBuf>,
    inspector: RepoInspector,
    scanner: Scanner,
    fetcher: FetchOrchestrator,
    store: ResultStore,
    events_tx: Sender<FetchEvent>,
    events_rx: Receiver<FetchEvent>,
    pub snapshot: Snapshot,
    pub fetch_status: Option<String>,
    status_hide_at: Option<Instant>,
    last_refresh: Option<Instant>,
    last_fetch_request: Option<Instant>,
    pub refreshed_at: Option<DateTime<Local>>,
    /// Index of the selected repository; also the first visible row.
    pub scroll_offset: usize,
    editor_requested: bool,
}

impl App {
    /// `config_path` is where auto-fetch toggles are persisted; `None` means
    /// the default location.
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        runner: Arc<dyn CommandRunner>,
    ) -> App {
        let store = ResultStore::new();
        let inspector = RepoInspector::new(Arc::clone(&runner), store.clone());
        let scanner = Scanner::new(config.watch_roots(), config.max_depth, inspector.clone());
        let fetcher = FetchOrchestrator::new(runner, store.clone());
        let (events_tx, events_rx) = unbounded();

        App {
            should_quit: false,
            config,
            config_path,
            inspector,
            scanner,
            fetcher,
            store,
            events_tx,
            events_rx,
            snapshot: Snapshot::default(),
            fetch_status: None,
            status_hide_at: None,
            last_refresh: None,
            last_fetch_request: None,
            refreshed_at: None,
            scroll_offset: 0,
            editor_requested: false,
        }
    }

    /// Initial refresh, plus an immediate fetch when auto-fetch is on.
    pub fn start(&mut self, now: Instant) {
        self.refresh(now);
        if self.config.auto_fetch_enabled {
            self.request_fetch(now);
        }
    }

    pub fn refresh(&mut self, now: Instant) {
        self.snapshot = self.scanner.scan_all();
        self.last_refresh = Some(now);
        self.refreshed_at = Some(Local::now());
        self.clamp_scroll();
    }

    /// Start a background fetch pass. Returns false if one is already running.
    pub fn request_fetch(&mut self, now: Instant) -> bool {
        self.last_fetch_request = Some(now);
        let repos = self.scanner.discover();
        let total = repos.len();

        match self.fetcher.spawn(repos, self.events_tx.clone()) {
            Ok(_) => {
                info!("Started fetch of {} repositories", total);
                self.show_status(
                    format!("[{}] Starting fetch of {} repositories...", timestamp(), total),
                    None,
                );
                true
            }
            Err(FetchError::AlreadyRunning) => {
                self.show_status(
                    "Fetch already in progress...".to_string(),
                    Some(now + STATUS_LINGER),
                );
                false
            }
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.fetcher.is_running()
    }

    /// Apply every event the background pass has sent so far. Returns true
    /// if anything arrived.
    pub fn drain_fetch_events(&mut self, now: Instant) -> bool {
        let mut received = false;
        while let Ok(event) = self.events_rx.try_recv() {
            received = true;
            match event {
                FetchEvent::Progress {
                    index, total, name, ..
                } => {
                    self.show_status(
                        format!("[{}] Fetching {}/{}: {}...", timestamp(), index, total, name),
                        None,
                    );
                }
                FetchEvent::Completed { summary, .. } => {
                    self.show_status(
                        format!("[{}] {}", timestamp(), summary),
                        Some(now + STATUS_LINGER),
                    );
                    self.refresh(now);
                }
            }
        }
        received
    }

    /// Periodic work: expire the status line, refresh, and auto-fetch.
    pub fn on_tick(&mut self, now: Instant) {
        if self.status_hide_at.is_some_and(|deadline| now >= deadline) {
            self.fetch_status = None;
            self.status_hide_at = None;
        }

        let refresh_due = self
            .last_refresh
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.refresh_interval);
        if refresh_due {
            self.refresh(now);
        }

        if self.config.auto_fetch_enabled && !self.fetcher.is_running() {
            let fetch_due = self.last_fetch_request.is_none_or(|last| {
                now.saturating_duration_since(last) >= self.config.auto_fetch_interval
            });
            if fetch_due {
                self.request_fetch(now);
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, now: Instant) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                info!("Ctrl+C pressed, quitting");
                self.should_quit = true;
            }
            KeyCode::Char('q') | KeyCode::Esc => {
                info!("Quit requested by user");
                self.should_quit = true;
            }
            KeyCode::Char('r') => self.refresh(now),
            KeyCode::Char('f') => {
                self.request_fetch(now);
            }
            KeyCode::Char('a') => self.toggle_auto_fetch(now),
            KeyCode::Char('c') => self.editor_requested = true,
            KeyCode::Char('j') | KeyCode::Down => self.scroll_down(),
            KeyCode::Char('k') | KeyCode::Up => self.scroll_up(),
            _ => {}
        }
    }

    /// Flip auto-fetch and persist just that flag. Enabling it starts a pass
    /// right away so the fetch indicators fill in.
    pub fn toggle_auto_fetch(&mut self, now: Instant) {
        self.config.auto_fetch_enabled = !self.config.auto_fetch_enabled;
        self.last_fetch_request = Some(now);
        let state = if self.config.auto_fetch_enabled {
            "enabled"
        } else {
            "disabled"
        };
        info!("Auto-fetch {}", state);

        if let Err(err) = self.persist_auto_fetch() {
            warn!("Failed to save config: {:#}", err);
            self.show_status(
                format!("Failed to save config: {:#}", err),
                Some(now + STATUS_LINGER),
            );
            return;
        }

        self.show_status(
            format!("[{}] Auto-fetch {}", timestamp(), state),
            Some(now + STATUS_LINGER),
        );
        if self.config.auto_fetch_enabled {
            self.request_fetch(now);
        }
    }

    pub fn config_file_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => get_default_config_path(),
        }
    }

    /// Write the toggle onto the file as it is on disk. The in-memory config
    /// may carry command-line overrides that must not be saved.
    fn persist_auto_fetch(&self) -> Result<()> {
        let path = self.config_file_path()?;
        let mut on_disk = Config::load(Some(path.clone()))?;
        on_disk.auto_fetch_enabled = self.config.auto_fetch_enabled;
        on_disk.save(path)
    }

    /// True once after `c` was pressed; the caller owns the terminal and
    /// opens the editor.
    pub fn take_editor_request(&mut self) -> bool {
        std::mem::take(&mut self.editor_requested)
    }

    /// Switch to a reloaded configuration and rescan.
    pub fn apply_config(&mut self, config: Config, now: Instant) {
        info!("Configuration reloaded");
        self.scanner = Scanner::new(config.watch_roots(), config.max_depth, self.inspector.clone());
        self.config = config;
        self.refresh(now);
    }

    pub fn report_error(&mut self, message: String, now: Instant) {
        self.show_status(message, Some(now + STATUS_LINGER));
    }

    fn show_status(&mut self, message: String, hide_at: Option<Instant>) {
        self.fetch_status = Some(message);
        self.status_hide_at = hide_at;
    }

    pub fn scroll_down(&mut self) {
        if self.scroll_offset + 1 < self.snapshot.len() {
            self.scroll_offset += 1;
        }
    }

    pub fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(1);
    }

    fn clamp_scroll(&mut self) {
        if self.scroll_offset >= self.snapshot.len() {
            self.scroll_offset = self.snapshot.len().saturating_sub(1);
        }
    }

    pub fn selected(&self) -> Option<&RepoReport> {
        self.snapshot.repos.get(self.scroll_offset)
    }

    pub fn info_bar(&self) -> String {
        let counts = &self.snapshot.counts;
        let mut parts = vec![
            format!("Directories: {}", self.scanner.roots().len()),
            format!("Repositories: {}", self.snapshot.len()),
            format!("Clean: {}", counts.clean),
        ];
        if counts.stashed > 0 {
            parts.push(format!("Stashed: {}", counts.stashed));
        }
        if counts.changes > 0 {
            parts.push(format!("Changes: {}", counts.changes));
        }
        if counts.errors > 0 {
            parts.push(format!("Errors: {}", counts.errors));
        }
        parts.push(if self.config.auto_fetch_enabled {
            format!("Auto-fetch: ON ({}s)", self.config.auto_fetch_interval.as_secs())
        } else {
            "Auto-fetch: OFF".to_string()
        });
        parts.join(" | ")
    }

    /// Detail text for the selected repository.
    pub fn detail_line(&self) -> Option<String> {
        let report = self.selected()?;
        let path = report.path().display();
        Some(match report {
            RepoReport::Ready(status) => {
                let message = if status.remote_head_message.is_empty() {
                    "No remote commit"
                } else {
                    status.remote_head_message.as_str()
                };
                let fetch = match self.store.get(&status.path) {
                    Some(outcome) if outcome.succeeded => "Success".to_string(),
                    Some(outcome) => format!("Failed ({})", outcome.message),
                    None => "not fetched".to_string(),
                };
                format!("{}  |  {}  |  Fetch: {}", message, path, fetch)
            }
            RepoReport::Failed(failure) => format!("Error: {}  |  {}", failure.message, path),
        })
    }

    pub fn ui(&self, f: &mut Frame) {
        let status_lines: Vec<Line> = self
            .fetch_status
            .as_deref()
            .map(|status| status.lines().map(|l| Line::from(l.to_string())).collect())
            .unwrap_or_default();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(1),
                Constraint::Min(1),
                Constraint::Length(status_lines.len() as u16),
                Constraint::Length(1),
                Constraint::Length(3),
            ])
            .split(f.area());

        let refreshed = self
            .refreshed_at
            .map(|at| at.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        let title = Paragraph::new(format!("repowatch    Last refresh: {}", refreshed))
            .block(Block::default().borders(Borders::ALL))
            .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
        f.render_widget(title, chunks[0]);

        let info = Paragraph::new(self.info_bar()).style(Style::default().fg(Color::Gray));
        f.render_widget(info, chunks[1]);

        let show_fetch = self.config.auto_fetch_enabled;
        let label_width = self
            .snapshot
            .repos
            .iter()
            .map(|r| repo_label(r).chars().count())
            .max()
            .unwrap_or(0)
            .min(MAX_LABEL_WIDTH);

        let available_height = chunks[2].height.saturating_sub(2) as usize;
        let content_lines: Vec<Line> = if self.snapshot.is_empty() {
            vec![Line::from("No Git repositories found in watch directories.")]
        } else {
            self.snapshot
                .repos
                .iter()
                .enumerate()
                .skip(self.scroll_offset)
                .take(available_height.max(1))
                .map(|(index, report)| {
                    let line = repo_line(report, label_width, show_fetch);
                    if index == self.scroll_offset {
                        line.add_modifier(Modifier::REVERSED)
                    } else {
                        line
                    }
                })
                .collect()
        };

        let main_content = Paragraph::new(content_lines)
            .block(Block::default().borders(Borders::ALL).title("Repositories"))
            .style(Style::default().fg(Color::White));
        f.render_widget(main_content, chunks[2]);

        if !status_lines.is_empty() {
            f.render_widget(
                Paragraph::new(status_lines).style(Style::default().fg(Color::Yellow)),
                chunks[3],
            );
        }

        if let Some(detail) = self.detail_line() {
            f.render_widget(
                Paragraph::new(detail).style(Style::default().fg(Color::DarkGray)),
                chunks[4],
            );
        }

        let footer = Paragraph::new(Line::from(vec![
            "r".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " refresh  ".into(),
            "f".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " fetch  ".into(),
            "a".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " auto-fetch  ".into(),
            "c".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " config  ".into(),
            "↑↓".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            "/".into(),
            "j,k".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " scroll  ".into(),
            "q".fg(Color::Yellow).add_modifier(Modifier::BOLD),
            " quit".into(),
        ]))
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Gray));
        f.render_widget(footer, chunks[5]);
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

fn repo_label(report: &RepoReport) -> String {
    format!("[{}] {}", report.remote_owner(), report.name())
}

fn state_glyph(state: RepoState) -> (&'static str, Color) {
    match state {
        RepoState::Clean => ("○", Color::Green),
        RepoState::Stashed => ("◐", Color::Yellow),
        RepoState::Changes => ("●", Color::Red),
        RepoState::Error => ("✗", Color::LightRed),
    }
}

/// Stable per-branch colour; main and master are bold green.
fn branch_color(branch_name: &str) -> (Color, bool) {
    if branch_name == "main" || branch_name == "master" {
        return (Color::Green, true);
    }

    let mut hash: u32 = 0;
    for byte in branch_name.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u32);
    }

    // no red: it marks errors
    let colors = [
        Color::Cyan,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::LightCyan,
        Color::LightYellow,
        Color::LightBlue,
        Color::LightMagenta,
    ];
    (colors[(hash % colors.len() as u32) as usize], false)
}

/// One dashboard row: label, branch, state, then tracking. The last fetch
/// result leads the tracking column only when `show_fetch` is set.
pub fn repo_line(report: &RepoReport, label_width: usize, show_fetch: bool) -> Line<'static> {
    let branch = report.current_branch().to_string();
    let (color, bold) = branch_color(&branch);
    let mut branch_style = Style::default().fg(color);
    if bold {
        branch_style = branch_style.add_modifier(Modifier::BOLD);
    }

    let state = report.state();
    let (glyph, state_color) = state_glyph(state);

    let mut spans = vec![
        Span::raw(format!("{:<width$}  ", repo_label(report), width = label_width)),
        Span::styled(format!("{:<width$}", branch, width = BRANCH_WIDTH), branch_style),
        Span::raw("  "),
        Span::styled(
            format!("{} {:<8}", glyph, state.to_string()),
            Style::default().fg(state_color),
        ),
    ];

    if show_fetch {
        spans.push(match report.last_fetch() {
            Some(FetchStatus::Success) => Span::styled("✓ ", Style::default().fg(Color::Green)),
            Some(FetchStatus::Failed) => Span::styled("✗ ", Style::default().fg(Color::Red)),
            None => Span::raw("  "),
        });
    }

    let (ahead, behind) = report.tracking();
    if ahead > 0 {
        spans.push(Span::styled(format!("↑ {} ", ahead), Style::default().fg(Color::Cyan)));
    }
    if behind > 0 {
        spans.push(Span::styled(format!("↓ {}", behind), Style::default().fg(Color::Magenta)));
    }

    Line::from(spans)
}

/// Row printed by `--once`.
pub fn plain_row(report: &RepoReport) -> String {
    let (ahead, behind) = report.tracking();
    let row = format!(
        "{}  {}  {}  ↑{} ↓{}",
        repo_label(report),
        report.current_branch(),
        report.state(),
        ahead,
        behind
    );
    match report.error_detail() {
        Some(detail) => format!("{}  {}", row, detail),
        None => row,
    }
}

pub fn counts_line(counts: &StateCounts) -> String {
    format!(
        "Total: {} | Clean: {} | Stashed: {} | Changes: {} | Errors: {}",
        counts.total(),
        counts.clean,
        counts.stashed,
        counts.changes,
        counts.errors
    )
}
