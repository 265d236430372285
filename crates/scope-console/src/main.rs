mod backend;
mod state;
mod theme;
mod ui;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use scope_core::{EventFrame, Notice, NoticeSeverity};
use scope_sync::{
    send_input, ConnectionState, Poller, RefreshCoordinator, Transport, TransportConfig,
    DEFAULT_POLL_INTERVAL,
};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use backend::FileTailSource;
use state::App;

const REFRESH_QUEUE_CAPACITY: usize = 64;

/// Views the coordinator fans refreshes out to.
const REFRESH_TARGETS: [&str; 3] = ["status", "agents", "history"];

#[derive(Clone, Debug)]
struct Config {
    session_id: String,
    state_dir: PathBuf,
    socket_path: PathBuf,
    push_enabled: bool,
    poll_interval: Duration,
}

fn load_config() -> Config {
    let session_id = resolve_session_id();
    let state_dir = resolve_state_dir();
    let socket_path = match std::env::var("SCOPE_SOCKET") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value.trim()),
        _ => state_dir.join(format!("{session_id}.sock")),
    };
    let push_enabled = std::env::var("SCOPE_PUSH_ENABLED")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(true);
    let poll_interval = std::env::var("SCOPE_POLL_INTERVAL_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    Config {
        session_id,
        state_dir,
        socket_path,
        push_enabled,
        poll_interval,
    }
}

fn resolve_session_id() -> String {
    if let Ok(value) = std::env::var("SCOPE_SESSION_ID") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    format!("swarm-{}", std::process::id())
}

fn resolve_state_dir() -> PathBuf {
    if let Ok(value) = std::env::var("SCOPE_STATE_DIR") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    std::env::temp_dir().join("swarmscope")
}

fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = matches!(
        std::env::var("SCOPE_LOG_STDOUT").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    // The alternate screen owns stdout, so logs are swallowed unless the
    // operator asks for them.
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config();
    init_logging();

    let (refresh_tx, mut refresh_rx) = mpsc::channel(REFRESH_QUEUE_CAPACITY);
    let (notice_tx, mut notice_rx) = mpsc::channel(REFRESH_QUEUE_CAPACITY);
    let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
    for target in REFRESH_TARGETS {
        coordinator.register(target);
    }

    let transport = config
        .push_enabled
        .then(|| Transport::spawn(TransportConfig::new(&config.socket_path)));
    let mut bus = transport.as_ref().map(Transport::subscribe);
    let mut transport_state = transport.as_ref().map(Transport::watch_state);

    let (poll_tx, mut poll_rx) = mpsc::channel(REFRESH_QUEUE_CAPACITY);
    let poller = Poller::spawn(
        FileTailSource::new(&config.state_dir, &config.session_id),
        config.session_id.clone(),
        poll_tx,
        config.poll_interval,
    );
    // With push up, the poller idles until a gap or outage needs it.
    poller.set_visible(!config.push_enabled);

    // Separate handle on the same files for the interactive send path.
    let mut input_source = FileTailSource::new(&config.state_dir, &config.session_id);

    let mut app = App::new(config.session_id.clone(), config.push_enabled);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();

    let result = loop {
        if app.take_poll_request() {
            poller.poke();
        }

        if let Some(text) = app.take_submitted_input() {
            // Optimistic local echo; the runner's output confirms delivery.
            app.push_local_echo(&text);
            if let Err(err) = send_input(&mut input_source, &text).await {
                app.set_notice(Notice {
                    severity: NoticeSeverity::Warn,
                    message: format!("send failed: {err}"),
                });
            }
        }

        if let Err(err) = terminal.draw(|frame| ui::render(frame, &mut app)) {
            break Err(err.into());
        }

        tokio::select! {
            maybe_event = events.next() => {
                match maybe_event {
                    Some(Ok(Event::Key(key))) => {
                        if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                            app.handle_key(key);
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => break Err(err.into()),
                    None => break Ok(()),
                }
            }
            frame = recv_frame(&mut bus) => {
                match frame {
                    BusRecv::Frame(frame) => {
                        coordinator.handle(&frame);
                        app.apply_frame(&frame);
                    }
                    BusRecv::Lagged(missed) => {
                        warn!(event = "bus_lagged", missed);
                        app.apply_bus_lag(missed);
                    }
                    BusRecv::Closed => {
                        bus = None;
                    }
                }
            }
            changed = watch_connection(&mut transport_state) => {
                if changed {
                    if let Some(state) = transport_state.as_ref().map(|rx| *rx.borrow()) {
                        app.set_connection(state);
                        // Polling covers for the push channel whenever it
                        // is not live.
                        poller.set_visible(state != ConnectionState::Open);
                    }
                } else {
                    transport_state = None;
                }
            }
            Some(refresh) = refresh_rx.recv() => {
                app.on_refresh(refresh);
            }
            Some(notice) = notice_rx.recv() => {
                app.set_notice(notice);
            }
            Some(update) = poll_rx.recv() => {
                app.apply_poll_update(update);
            }
        }

        if app.should_quit {
            break Ok(());
        }
    };

    coordinator.shutdown();
    if let Some(transport) = &transport {
        transport.close();
    }
    poller.close();

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

enum BusRecv {
    Frame(EventFrame),
    Lagged(u64),
    Closed,
}

/// Receives from the push bus when one exists, otherwise parks forever so
/// the select branch never fires.
async fn recv_frame(bus: &mut Option<broadcast::Receiver<EventFrame>>) -> BusRecv {
    match bus {
        Some(receiver) => match receiver.recv().await {
            Ok(frame) => BusRecv::Frame(frame),
            Err(broadcast::error::RecvError::Lagged(missed)) => BusRecv::Lagged(missed),
            Err(broadcast::error::RecvError::Closed) => BusRecv::Closed,
        },
        None => std::future::pending().await,
    }
}

/// Waits for a connection state change; `false` means the transport ended.
async fn watch_connection(
    state: &mut Option<tokio::sync::watch::Receiver<ConnectionState>>,
) -> bool {
    match state {
        Some(receiver) => receiver.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}
