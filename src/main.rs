use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use repowatch::app::{self, App};
use repowatch::cli::CliArgs;
use repowatch::config::{Config, get_default_log_path};
use repowatch::runner::{CommandRunner, ProcessRunner};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Stdout};
use std::path::Path;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const TICK: Duration = Duration::from_millis(250);
const DEFAULT_EDITOR: &str = "vim";

type Tui = Terminal<CrosstermBackend<Stdout>>;

fn init_logging(args: &CliArgs) -> Result<()> {
    let level = args
        .log_level()
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::WARN);
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    if args.log_level().is_some() {
        let log_path = get_default_log_path()?;
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    } else if args.once {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
    // Dashboard without -v/-d: the terminal belongs to the UI, logs are dropped.
    Ok(())
}

fn run_once(config: Config) {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let mut app = App::new(config, None, runner);
    app.refresh(Instant::now());

    for report in &app.snapshot.repos {
        println!("{}", app::plain_row(report));
    }
    println!("{}", app::counts_line(&app.snapshot.counts));
}

fn run_dashboard(terminal: &mut Tui, app: &mut App, args: &CliArgs) -> Result<()> {
    app.start(Instant::now());

    loop {
        terminal.draw(|f| app.ui(f))?;

        if event::poll(TICK)? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key, Instant::now());
            }
        }

        if app.should_quit {
            break;
        }

        if app.take_editor_request() {
            edit_config(terminal, app, args)?;
        }

        let now = Instant::now();
        app.drain_fetch_events(now);
        app.on_tick(now);
    }
    Ok(())
}

/// Hand the terminal to `$EDITOR` for the config file, then reload it.
fn edit_config(terminal: &mut Tui, app: &mut App, args: &CliArgs) -> Result<()> {
    let path = match app.config_file_path() {
        Ok(path) => path,
        Err(err) => {
            app.report_error(format!("Failed to locate config: {:#}", err), Instant::now());
            return Ok(());
        }
    };

    suspend_terminal(terminal)?;
    let edited = launch_editor(&editor_program(std::env::var_os("EDITOR")), &path);
    resume_terminal(terminal)?;

    let now = Instant::now();
    if let Err(err) = edited {
        warn!("Editor failed: {:#}", err);
        app.report_error(format!("Failed to open editor: {:#}", err), now);
        return Ok(());
    }
    match Config::from_cli_and_file(args) {
        Ok(config) => app.apply_config(config, now),
        Err(err) => {
            warn!("Edited config rejected: {:#}", err);
            app.report_error(format!("Configuration error: {:#}", err), now);
        }
    }
    Ok(())
}

fn editor_program(value: Option<OsString>) -> OsString {
    value
        .filter(|editor| !editor.is_empty())
        .unwrap_or_else(|| OsString::from(DEFAULT_EDITOR))
}

fn launch_editor(editor: &OsString, path: &Path) -> Result<()> {
    info!("Opening {} in {}", path.display(), editor.to_string_lossy());
    let status = Command::new(editor)
        .arg(path)
        .status()
        .with_context(|| format!("Failed to run {}", editor.to_string_lossy()))?;
    if !status.success() {
        info!("Editor exited with {}", status);
    }
    Ok(())
}

fn suspend_terminal(terminal: &mut Tui) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn resume_terminal(terminal: &mut Tui) -> Result<()> {
    enable_raw_mode()?;
    execute!(terminal.backend_mut(), EnterAlternateScreen)?;
    terminal.clear()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(&args)?;

    let config = match Config::from_cli_and_file(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Configuration error: {:#}", err);
            std::process::exit(1);
        }
    };
    info!(
        "Starting repowatch with {} watch directories",
        config.watch_directories.len()
    );

    if args.once {
        run_once(config);
        return Ok(());
    }

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new());
    let mut app = App::new(config, args.config.clone(), runner);
    let res = run_dashboard(&mut terminal, &mut app, &args);

    suspend_terminal(&mut terminal)?;

    // Terminal is restored; a failed loop still exits non-zero
    if let Err(err) = &res {
        error!("Application error: {:#}", err);
    }
    res?;

    info!("repowatch shut down cleanly");
    Ok(())
}
