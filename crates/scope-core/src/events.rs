use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Events pushed by the swarm supervisor, one JSON object per NDJSON frame.
///
/// Unknown `type` values and unknown fields inside known types are tolerated:
/// the supervisor grows its schema additively and the console must keep
/// working against newer emitters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    Log {
        agent: String,
        #[serde(default)]
        lines: Vec<String>,
    },
    Heartbeat,
    Signal,
    Tasks,
    FileChanged {
        file: String,
    },
    CircuitBreakerOpened {
        agent: String,
    },
    CircuitBreakerClosed {
        agent: String,
    },
    SwarmComplete,
    SwarmFailed {
        error: String,
    },
}

impl SwarmEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            SwarmEvent::Log { .. } => "log",
            SwarmEvent::Heartbeat => "heartbeat",
            SwarmEvent::Signal => "signal",
            SwarmEvent::Tasks => "tasks",
            SwarmEvent::FileChanged { .. } => "file_changed",
            SwarmEvent::CircuitBreakerOpened { .. } => "circuit_breaker_opened",
            SwarmEvent::CircuitBreakerClosed { .. } => "circuit_breaker_closed",
            SwarmEvent::SwarmComplete => "swarm_complete",
            SwarmEvent::SwarmFailed { .. } => "swarm_failed",
        }
    }

    fn is_known_type(type_name: &str) -> bool {
        matches!(
            type_name,
            "log"
                | "heartbeat"
                | "signal"
                | "tasks"
                | "file_changed"
                | "circuit_breaker_opened"
                | "circuit_breaker_closed"
                | "swarm_complete"
                | "swarm_failed"
        )
    }
}

/// A recognized event as delivered on the bus: tagged with a monotonically
/// increasing sequence number so consumers can detect gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub seq: u64,
    pub event: SwarmEvent,
    pub received_at: DateTime<Utc>,
}

impl EventFrame {
    pub fn new(seq: u64, event: SwarmEvent) -> Self {
        Self {
            seq,
            event,
            received_at: Utc::now(),
        }
    }
}

/// One line of stream content. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: Uuid,
    pub source: String,
    pub text: String,
    pub seq: u64,
}

impl Entry {
    pub fn new(source: impl Into<String>, text: impl Into<String>, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            text: text.into(),
            seq,
        }
    }
}

/// Hands out per-stream entry sequence numbers.
#[derive(Debug, Default)]
pub struct EntrySeq {
    next: u64,
}

impl EntrySeq {
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    Oversized { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Outcome of decoding a batch of raw bytes.
///
/// Unknown event types are reported by name rather than as errors: they are a
/// forward-compatibility case, not a protocol violation.
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    pub events: Vec<SwarmEvent>,
    pub unknown_types: Vec<String>,
    pub errors: Vec<FrameError>,
}

/// Parses one raw frame.
///
/// `Ok(Some(event))` for a recognized event, `Ok(None)` for a well-formed
/// frame with an unrecognized `type` (caller ignores it), `Err` for anything
/// that is not a JSON object with a string `type`.
pub fn parse_event(raw: &str) -> Result<Option<SwarmEvent>, FrameError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    let type_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| FrameError::Decode("missing string field 'type'".to_string()))?;
    if !SwarmEvent::is_known_type(type_name) {
        return Ok(None);
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| FrameError::Decode(err.to_string()))
}

/// Incremental NDJSON decoder for the push connection.
///
/// Accepts arbitrary byte chunks, emits a report per chunk. Oversized or
/// malformed lines are reported and skipped; decoding always continues with
/// the next line.
pub struct FrameDecoder {
    max_frame_bytes: usize,
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
        }
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport {
        let mut report = DecodeReport::default();
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            self.decode_line(&line, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }

        report
    }

    /// Drains any trailing frame left without a newline (connection close).
    pub fn finish(&mut self) -> DecodeReport {
        let mut report = DecodeReport::default();
        if self.pending.is_empty() {
            return report;
        }
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line, &mut report);
        report
    }

    fn decode_line(&self, line: &[u8], report: &mut DecodeReport) {
        if line.len() > self.max_frame_bytes {
            report.errors.push(FrameError::Oversized {
                size: line.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        let text = match std::str::from_utf8(line) {
            Ok(text) => text,
            Err(err) => {
                report.errors.push(FrameError::Decode(err.to_string()));
                return;
            }
        };
        match parse_event(text) {
            Ok(Some(event)) => report.events.push(event),
            Ok(None) => {
                let type_name = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|value| value.get("type").and_then(|t| t.as_str().map(String::from)))
                    .unwrap_or_default();
                report.unknown_types.push(type_name);
            }
            Err(err) => report.errors.push(err),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}
