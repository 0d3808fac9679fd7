mod app;
mod auth;
mod aws;
mod cli;
mod clipboard;
mod command;
mod config;
mod handoff;
mod input;
mod list;
mod model;
mod navigation;
mod provider;
mod search;
mod task;
mod ui;
mod viewport;

use anyhow::{Context, Result};
use app::{App, AppEvent, ExitReason};
use auth::{AwsSso, SessionCache};
use aws::AwsCli;
use clap::Parser;
use cli::CliArgs;
use config::{AppConfig, AuthConfig, AuthStore, state_dir};
use crossterm::event::{
    Event, EventStream, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
    PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
    supports_keyboard_enhancement,
};
use futures::StreamExt;
use handoff::{HandoffController, HandoffPhase, HandoffSettings, RestoreContext};
use model::CloudContext;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use task::{Completion, Dispatcher};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior, interval, interval_at};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use ui::TuiTerminal;

type CloudDispatcher = Dispatcher<AwsCli, AwsSso>;

/// Long-lived pieces shared by every event loop run, including the ones after a handoff.
struct Session {
    config: AppConfig,
    provider: Arc<AwsCli>,
    dispatcher: CloudDispatcher,
    completions: mpsc::UnboundedReceiver<Completion>,
    handoff: HandoffController,
    settings: HandoffSettings,
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_filter, args.log_file.as_deref())?;

    let config = AppConfig::load(args.config.as_deref())?;
    let state = state_dir()?;
    let auth_store = AuthStore::new(&state);
    let auth = match &args.profile {
        Some(profile) => Some(AuthConfig::profile(profile.clone())),
        None => auth_store.load()?,
    };

    let region = config.resolve_region(args.region.as_deref());
    info!(
        "starting in {region} with config {}",
        config.source.as_deref().unwrap_or("<defaults>")
    );

    let provider = Arc::new(AwsCli::new(args.aws_bin.clone()));
    let credentials = Arc::new(AwsSso::new(
        AwsCli::new(args.aws_bin.clone()),
        SessionCache::new(state.join("sso-cache")),
    ));
    let (dispatcher, completions) =
        Dispatcher::new(Arc::clone(&provider), credentials, auth_store);

    let settings = HandoffSettings {
        aws_bin: args.aws_bin.clone(),
        editor: config.editor(),
        dashboard: config.dashboard_command.clone(),
    };
    let app = App::new(config.clone(), CloudContext::new(region), auth);
    let mut session = Session {
        config,
        provider,
        dispatcher,
        completions,
        handoff: HandoffController::new(),
        settings,
        tick_ms: args.tick_ms.max(16),
    };

    run(app, &mut session).await
}

fn init_tracing(level_filter: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_new(level_filter)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("failed to initialize tracing filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(io::sink).try_init();
        }
    }

    Ok(())
}

async fn run(app: App, session: &mut Session) -> Result<()> {
    let (mut terminal, keyboard_enhanced) = init_terminal()?;
    let run_result = drive(&mut terminal, app, session).await;
    let restore_result = restore_terminal(&mut terminal, keyboard_enhanced);

    match (run_result, restore_result) {
        (Err(run_error), Err(restore_error)) => Err(anyhow::anyhow!(
            "{run_error:#}\nterminal restore error: {restore_error:#}"
        )),
        (Err(error), _) => Err(error),
        (_, Err(error)) => Err(error),
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Runs the event loop until quit, handing the terminal to a child process and rebuilding the
/// app from its restore context whenever the loop stops for a handoff.
async fn drive(terminal: &mut TuiTerminal, mut app: App, session: &mut Session) -> Result<()> {
    let mut tasks = app.bootstrap();
    loop {
        session.dispatcher.dispatch_all(tasks);
        match run_loop(terminal, &mut app, session).await? {
            ExitReason::Quit => return Ok(()),
            ExitReason::Handoff(request) => {
                let snapshot = serde_json::to_string(&app.restore_context(None))
                    .context("failed to encode restore context")?;
                let notice = session
                    .handoff
                    .perform(
                        terminal,
                        &request,
                        app.context(),
                        &session.settings,
                        session.provider.as_ref(),
                    )
                    .await;
                if session.handoff.phase() != HandoffPhase::Owned {
                    warn!("terminal not fully reclaimed after {}", request.label());
                }
                let mut restore: RestoreContext =
                    serde_json::from_str(&snapshot).context("failed to decode restore context")?;
                restore.notice = Some(notice);

                app = App::new(
                    session.config.clone(),
                    restore.context.clone(),
                    restore.auth.clone(),
                );
                tasks = app.restore(restore);
            }
        }
    }
}

fn init_terminal() -> Result<(TuiTerminal, bool)> {
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    let keyboard_enhanced = matches!(supports_keyboard_enhancement(), Ok(true));
    if keyboard_enhanced {
        execute!(
            stdout,
            EnterAlternateScreen,
            PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                    | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
            )
        )
        .context("failed to enter alternate screen with keyboard enhancement")?;
    } else {
        execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    }
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal backend")?;
    terminal.clear().context("failed to clear terminal")?;
    Ok((terminal, keyboard_enhanced))
}

fn restore_terminal(terminal: &mut TuiTerminal, keyboard_enhanced: bool) -> Result<()> {
    if keyboard_enhanced {
        execute!(terminal.backend_mut(), PopKeyboardEnhancementFlags)
            .context("failed to pop keyboard enhancement flags")?;
    }
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;
    Ok(())
}

/// One run of the event loop. The event stream lives only here so a handoff can read the
/// terminal directly once this returns.
async fn run_loop(
    terminal: &mut TuiTerminal,
    app: &mut App,
    session: &mut Session,
) -> Result<ExitReason> {
    let mut reader = EventStream::new();
    let mut ticker = interval(Duration::from_millis(session.tick_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let refresh_every = Duration::from_secs(session.config.auto_refresh_secs);
    let mut refresh = interval_at(Instant::now() + refresh_every, refresh_every);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let size = terminal.size().context("failed to read terminal size")?;
    app.apply(AppEvent::Resize {
        rows: ui::list_rows(size.height),
    });

    loop {
        flush_clipboard(app);
        terminal
            .draw(|frame| ui::render(frame, app))
            .context("failed to render terminal frame")?;

        if let Some(exit) = app.take_exit() {
            return Ok(exit);
        }
        if !app.running() {
            return Ok(ExitReason::Quit);
        }

        tokio::select! {
            maybe_event = reader.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                        if let Some(action) = input::map_key(app.key_context(), key) {
                            debug!("action={action:?}");
                            let tasks = app.apply(AppEvent::Action(action));
                            session.dispatcher.dispatch_all(tasks);
                        }
                    }
                    Some(Ok(Event::Resize(_, rows))) => {
                        app.apply(AppEvent::Resize {
                            rows: ui::list_rows(rows),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        app.set_status(format!("terminal event error: {error}"));
                    }
                    None => {
                        app.set_status("terminal event stream closed");
                        return Ok(ExitReason::Quit);
                    }
                }
            }
            maybe_completion = session.completions.recv() => {
                if let Some(completion) = maybe_completion {
                    let tasks = app.apply(AppEvent::Completion(completion));
                    session.dispatcher.dispatch_all(tasks);
                }
            }
            _ = refresh.tick() => {
                let tasks = app.apply(AppEvent::Tick);
                session.dispatcher.dispatch_all(tasks);
            }
            _ = ticker.tick() => {}
        }
    }
}

fn flush_clipboard(app: &mut App) {
    let Some(copy) = app.take_clipboard() else {
        return;
    };
    match clipboard::copy(&copy.text) {
        Ok(()) => app.set_status(format!("Copied {} to clipboard", copy.label)),
        Err(error) => {
            warn!("clipboard copy failed: {error:#}");
            app.set_status(format!("Could not copy {}: {error}", copy.label));
        }
    }
}
