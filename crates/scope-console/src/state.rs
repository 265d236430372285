use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent};
use scope_core::{
    BoundedStream, Entry, EntrySeq, EventFrame, Notice, NoticeSeverity, SwarmEvent, Viewport,
    ACTIVITY_FEED_CAPACITY, LOG_STREAM_CAPACITY,
};
use scope_sync::{ConnectionState, PollUpdate, Refresh};
use tracing::info;

/// Rows materialized beyond the visible band when a list is windowed.
pub const LOG_OVERSCAN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Agents,
    Activity,
    Output,
}

impl Mode {
    pub fn title(self) -> &'static str {
        match self {
            Mode::Agents => "Agents",
            Mode::Activity => "Activity",
            Mode::Output => "Output",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Mode::Agents => Mode::Activity,
            Mode::Activity => Mode::Output,
            Mode::Output => Mode::Agents,
        }
    }
}

/// One agent's log pane. Scroll state is per agent so switching panes does
/// not lose your place.
pub struct AgentView {
    pub name: String,
    pub logs: BoundedStream,
    pub viewport: Viewport,
    pub follow: bool,
    pub breaker_open: bool,
    pub last_event_at: DateTime<Utc>,
    seq: EntrySeq,
}

impl AgentView {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            logs: BoundedStream::new(LOG_STREAM_CAPACITY),
            viewport: Viewport::new(0, 1, LOG_OVERSCAN),
            follow: true,
            breaker_open: false,
            last_event_at: Utc::now(),
            seq: EntrySeq::default(),
        }
    }

    fn push_line(&mut self, text: String) {
        let seq = self.seq.next_seq();
        self.logs.push(Entry::new(self.name.clone(), text, seq));
        self.last_event_at = Utc::now();
        if self.follow {
            self.viewport.scroll_offset = self.viewport.max_scroll_offset(self.logs.len());
        }
    }
}

/// Whether the finished swarm succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmOutcome {
    Complete,
    Failed(String),
}

pub struct App {
    pub session_id: String,
    pub push_enabled: bool,
    pub mode: Mode,
    pub help_open: bool,
    pub should_quit: bool,
    pub connection: ConnectionState,
    pub status_note: Option<Notice>,
    pub agents: BTreeMap<String, AgentView>,
    pub selected_agent: usize,
    pub activity: BoundedStream,
    pub activity_viewport: Viewport,
    pub output: BoundedStream,
    pub output_viewport: Viewport,
    pub outcome: Option<SwarmOutcome>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub frames_received: u64,
    pub gaps_detected: u64,
    pub refresh_counts: BTreeMap<String, u64>,
    pub input_active: bool,
    pub input_buffer: String,
    last_seq: u64,
    feed_seq: EntrySeq,
    output_seq: EntrySeq,
    poll_requested: bool,
    submitted_input: Option<String>,
}

impl App {
    pub fn new(session_id: impl Into<String>, push_enabled: bool) -> Self {
        Self {
            session_id: session_id.into(),
            push_enabled,
            mode: Mode::default(),
            help_open: false,
            should_quit: false,
            connection: ConnectionState::Connecting,
            status_note: None,
            agents: BTreeMap::new(),
            selected_agent: 0,
            activity: BoundedStream::new(ACTIVITY_FEED_CAPACITY),
            activity_viewport: Viewport::new(0, 1, LOG_OVERSCAN),
            output: BoundedStream::new(LOG_STREAM_CAPACITY),
            output_viewport: Viewport::new(0, 1, LOG_OVERSCAN),
            outcome: None,
            last_heartbeat: None,
            frames_received: 0,
            gaps_detected: 0,
            refresh_counts: BTreeMap::new(),
            input_active: false,
            input_buffer: String::new(),
            last_seq: 0,
            feed_seq: EntrySeq::default(),
            output_seq: EntrySeq::default(),
            poll_requested: false,
            submitted_input: None,
        }
    }

    /// The label shown in the header next to the connection dot.
    pub fn status_label(&self) -> &'static str {
        if self.push_enabled {
            self.connection.label()
        } else {
            "local"
        }
    }

    /// Applies one pushed frame. Detects sequence gaps and requests a poll
    /// to reconcile anything the bus dropped.
    pub fn apply_frame(&mut self, frame: &EventFrame) {
        if self.last_seq != 0 && frame.seq > self.last_seq + 1 {
            let missed = frame.seq - self.last_seq - 1;
            self.gaps_detected += missed;
            self.note(
                NoticeSeverity::Warn,
                format!("missed {missed} pushed events; reconciling from log"),
            );
            self.poll_requested = true;
        }
        self.last_seq = self.last_seq.max(frame.seq);
        self.frames_received += 1;

        match &frame.event {
            SwarmEvent::Log { agent, lines } => {
                let view = self
                    .agents
                    .entry(agent.clone())
                    .or_insert_with(|| AgentView::new(agent.clone()));
                for line in lines {
                    view.push_line(line.clone());
                }
            }
            SwarmEvent::Heartbeat => {
                self.last_heartbeat = Some(frame.received_at);
            }
            SwarmEvent::Signal => {
                self.push_activity("signal received".to_string());
            }
            SwarmEvent::Tasks => {
                self.push_activity("task state updated".to_string());
            }
            SwarmEvent::FileChanged { file } => {
                self.push_activity(format!("file changed: {file}"));
            }
            SwarmEvent::CircuitBreakerOpened { agent } => {
                self.agents
                    .entry(agent.clone())
                    .or_insert_with(|| AgentView::new(agent.clone()))
                    .breaker_open = true;
                self.push_activity(format!("circuit breaker opened: {agent}"));
            }
            SwarmEvent::CircuitBreakerClosed { agent } => {
                if let Some(view) = self.agents.get_mut(agent) {
                    view.breaker_open = false;
                }
                self.push_activity(format!("circuit breaker closed: {agent}"));
            }
            SwarmEvent::SwarmComplete => {
                self.outcome = Some(SwarmOutcome::Complete);
                self.push_activity("swarm completed".to_string());
            }
            SwarmEvent::SwarmFailed { error } => {
                self.outcome = Some(SwarmOutcome::Failed(error.clone()));
                self.push_activity(format!("swarm failed: {error}"));
            }
        }
    }

    /// Records frames the push bus dropped because this consumer fell
    /// behind, and requests a reconciliation poll. Sequence tracking resets
    /// so the next frame's jump is not double-counted as a second gap.
    pub fn apply_bus_lag(&mut self, missed: u64) {
        self.gaps_detected += missed;
        self.last_seq = 0;
        self.note(
            NoticeSeverity::Warn,
            format!("display fell behind; {missed} events dropped, reconciling from log"),
        );
        self.poll_requested = true;
    }

    /// Applies output fetched by the poller. Lines from a known agent land
    /// in its pane; everything else goes to the raw output stream.
    pub fn apply_poll_update(&mut self, update: PollUpdate) {
        match update {
            PollUpdate::Entries(entries) => {
                for entry in entries {
                    match self.agents.get_mut(&entry.source) {
                        Some(view) => view.push_line(entry.text),
                        None => {
                            let seq = self.output_seq.next_seq();
                            self.output.push(Entry::new(entry.source, entry.text, seq));
                            self.output_viewport.scroll_offset =
                                self.output_viewport.max_scroll_offset(self.output.len());
                        }
                    }
                }
            }
            PollUpdate::Degraded { notice } => {
                self.status_note = Some(notice);
            }
            PollUpdate::Recovered => {
                self.note(NoticeSeverity::Info, "log polling recovered".to_string());
            }
        }
    }

    pub fn on_refresh(&mut self, refresh: Refresh) {
        info!(event = "view_refresh", target = %refresh.target, cause = refresh.cause);
        *self.refresh_counts.entry(refresh.target).or_default() += 1;
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.status_note = Some(notice);
    }

    pub fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == ConnectionState::Open && state == ConnectionState::Reconnecting {
            self.note(
                NoticeSeverity::Warn,
                "push connection lost; retrying".to_string(),
            );
        }
        self.connection = state;
    }

    /// Takes the pending one-shot poll request, if any.
    pub fn take_poll_request(&mut self) -> bool {
        std::mem::take(&mut self.poll_requested)
    }

    pub fn selected_agent_name(&self) -> Option<&str> {
        self.agents
            .keys()
            .nth(self.selected_agent)
            .map(String::as_str)
    }

    fn note(&mut self, severity: NoticeSeverity, message: String) {
        self.status_note = Some(Notice { severity, message });
    }

    fn push_activity(&mut self, text: String) {
        let seq = self.feed_seq.next_seq();
        self.activity.push(Entry::new("swarm", text, seq));
        self.activity_viewport.scroll_offset =
            self.activity_viewport.max_scroll_offset(self.activity.len());
    }

    /// Takes the line the operator submitted with Enter, if any.
    pub fn take_submitted_input(&mut self) -> Option<String> {
        self.submitted_input.take()
    }

    /// Echoes sent input into the output stream ahead of any acknowledgment.
    pub fn push_local_echo(&mut self, text: &str) {
        let seq = self.output_seq.next_seq();
        self.output.push(Entry::new("operator", format!("> {text}"), seq));
        self.output_viewport.scroll_offset =
            self.output_viewport.max_scroll_offset(self.output.len());
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.help_open {
            // Any key closes the overlay, matching its own hint.
            self.help_open = false;
            return;
        }
        if self.input_active {
            match key.code {
                KeyCode::Esc => {
                    self.input_active = false;
                    self.input_buffer.clear();
                }
                KeyCode::Enter => {
                    let text = std::mem::take(&mut self.input_buffer);
                    self.input_active = false;
                    if !text.trim().is_empty() {
                        self.submitted_input = Some(text);
                    }
                }
                KeyCode::Backspace => {
                    self.input_buffer.pop();
                }
                KeyCode::Char(c) => self.input_buffer.push(c),
                _ => {}
            }
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('?') => self.help_open = true,
            KeyCode::Char('i') => self.input_active = true,
            KeyCode::Tab => self.mode = self.mode.next(),
            KeyCode::Char('1') => self.mode = Mode::Agents,
            KeyCode::Char('2') => self.mode = Mode::Activity,
            KeyCode::Char('3') => self.mode = Mode::Output,
            KeyCode::Char('r') => self.poll_requested = true,
            KeyCode::Char('j') | KeyCode::Down => self.scroll(1),
            KeyCode::Char('k') | KeyCode::Up => self.scroll(-1),
            KeyCode::PageDown => self.scroll_page(1),
            KeyCode::PageUp => self.scroll_page(-1),
            KeyCode::Char('g') => self.scroll_to_top(),
            KeyCode::Char('G') => self.scroll_to_bottom(),
            KeyCode::Char('n') => self.select_agent(1),
            KeyCode::Char('p') => self.select_agent(-1),
            _ => {}
        }
    }

    fn select_agent(&mut self, delta: isize) {
        if self.agents.is_empty() {
            return;
        }
        let count = self.agents.len();
        self.selected_agent =
            (self.selected_agent as isize + delta).rem_euclid(count as isize) as usize;
    }

    fn scroll(&mut self, delta: isize) {
        let (viewport, len, follow) = self.current_view_mut();
        viewport.scroll_by(delta, len);
        if let Some(follow) = follow {
            *follow = viewport.scroll_offset >= viewport.max_scroll_offset(len);
        }
    }

    fn scroll_page(&mut self, direction: isize) {
        let (viewport, len, follow) = self.current_view_mut();
        let page = viewport.visible_count() as isize;
        viewport.scroll_by(direction * page, len);
        if let Some(follow) = follow {
            *follow = viewport.scroll_offset >= viewport.max_scroll_offset(len);
        }
    }

    fn scroll_to_top(&mut self) {
        let (viewport, _, follow) = self.current_view_mut();
        viewport.scroll_offset = 0;
        if let Some(follow) = follow {
            *follow = false;
        }
    }

    fn scroll_to_bottom(&mut self) {
        let (viewport, len, follow) = self.current_view_mut();
        viewport.scroll_offset = viewport.max_scroll_offset(len);
        if let Some(follow) = follow {
            *follow = true;
        }
    }

    /// Viewport, content length, and the follow flag for the pane the
    /// current mode scrolls.
    fn current_view_mut(&mut self) -> (&mut Viewport, usize, Option<&mut bool>) {
        match self.mode {
            Mode::Agents => {
                let selected = self.selected_agent;
                match self.agents.values_mut().nth(selected) {
                    Some(view) => {
                        let len = view.logs.len();
                        (&mut view.viewport, len, Some(&mut view.follow))
                    }
                    None => {
                        let len = self.output.len();
                        (&mut self.output_viewport, len, None)
                    }
                }
            }
            Mode::Activity => {
                let len = self.activity.len();
                (&mut self.activity_viewport, len, None)
            }
            Mode::Output => {
                let len = self.output.len();
                (&mut self.output_viewport, len, None)
            }
        }
    }
}
