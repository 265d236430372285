//! Push connection to the swarm supervisor.
//!
//! One transport per session. The supervisor pushes NDJSON frames over a
//! Unix domain socket; recognized events are fanned out to every subscriber
//! in arrival order, tagged with a monotonically increasing sequence number.
//! Missed events are not replayed across reconnects: consumers tolerate gaps
//! and reconcile via polling or refetch.

use std::path::PathBuf;
use std::time::Duration;

use scope_core::{EventFrame, FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
pub const MAX_BACKOFF: Duration = Duration::from_secs(10);
/// Frames buffered on the bus per subscriber before it is considered lagged.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Shared, read-only connection status. Lives for the whole session, across
/// view mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    /// Terminal: explicit close, auto-reconnect disabled.
    Closed,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "live",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "offline",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub socket_path: PathBuf,
    pub max_frame_bytes: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl TransportConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

/// Handle to the running transport task.
pub struct Transport {
    events: broadcast::Sender<EventFrame>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl Transport {
    /// Spawns the connection loop on the current runtime.
    pub fn spawn(config: TransportConfig) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();

        tokio::spawn(run_loop(
            config,
            events_tx.clone(),
            state_tx,
            cancel.clone(),
        ));

        Self {
            events: events_tx,
            state: state_rx,
            cancel,
        }
    }

    /// Every subscriber sees every frame delivered after it subscribed, in
    /// arrival order. A subscriber that falls behind the bus capacity
    /// observes `RecvError::Lagged` and should reconcile via polling.
    pub fn subscribe(&self) -> broadcast::Receiver<EventFrame> {
        self.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn reconnecting(&self) -> bool {
        self.state() == ConnectionState::Reconnecting
    }

    /// Terminal stop: transitions to `Closed` and disables auto-reconnect.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Reconnect delay schedule: doubles per consecutive failure up to a cap,
/// back to the initial delay after a successful connect.
#[derive(Debug)]
struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; escalates the one after.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current + self.current).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

async fn run_loop(
    config: TransportConfig,
    events: broadcast::Sender<EventFrame>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
    let mut seq: u64 = 0;

    loop {
        state.send_replace(ConnectionState::Connecting);
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            connected = UnixStream::connect(&config.socket_path) => connected,
        };
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(event = "transport_connect_error", error = %err);
                state.send_replace(ConnectionState::Reconnecting);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    () = tokio::time::sleep(backoff.next_delay()) => {}
                }
                continue;
            }
        };
        backoff.reset();
        state.send_replace(ConnectionState::Open);

        read_frames(stream, &config, &events, &mut seq, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        state.send_replace(ConnectionState::Reconnecting);
        tokio::select! {
            _ = cancel.cancelled() => break,
            () = tokio::time::sleep(backoff.next_delay()) => {}
        }
    }

    state.send_replace(ConnectionState::Closed);
}

/// Reads until the peer drops, an I/O error occurs, or the transport is
/// closed. Decode problems never abort the connection.
async fn read_frames(
    mut stream: UnixStream,
    config: &TransportConfig,
    events: &broadcast::Sender<EventFrame>,
    seq: &mut u64,
    cancel: &CancellationToken,
) {
    let mut decoder = FrameDecoder::new(config.max_frame_bytes);
    let mut read_buf = [0u8; 8192];

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return,
            read = stream.read(&mut read_buf) => read,
        };
        let read = match read {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                warn!(event = "transport_read_error", error = %err);
                break;
            }
        };
        let report = decoder.push_chunk(&read_buf[..read]);
        deliver(report, events, seq);
    }

    deliver(decoder.finish(), events, seq);
}

fn deliver(
    report: scope_core::DecodeReport,
    events: &broadcast::Sender<EventFrame>,
    seq: &mut u64,
) {
    for err in report.errors {
        warn!(event = "transport_decode_error", error = %err);
    }
    for type_name in report.unknown_types {
        debug!(event = "transport_unknown_event_type", type_name = %type_name);
    }
    for decoded in report.events {
        *seq += 1;
        // No receivers is fine: frames before the first subscriber are simply
        // not retained (at-most-once, no replay).
        let _ = events.send(EventFrame::new(*seq, decoded));
    }
}
