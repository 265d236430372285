//! Data layer for the swarmscope operator console: typed swarm events and
//! their NDJSON wire decoding, bounded append streams, the virtual window
//! planner, the ANSI/SGR interpreter, and the refresh policy table.
//!
//! Everything here is synchronous and I/O-free; the live plumbing lives in
//! `scope-sync`.

pub mod ansi;
pub mod events;
pub mod refresh;
pub mod stream;
pub mod window;

pub use ansi::{parse_line, strip, AnsiColor, StyledSegment, TextStyle};
pub use events::{
    parse_event, DecodeReport, Entry, EntrySeq, EventFrame, FrameDecoder, FrameError, SwarmEvent,
    DEFAULT_MAX_FRAME_BYTES,
};
pub use refresh::{refresh_action, Notice, NoticeSeverity, RefreshAction, DEBOUNCE_WINDOW};
pub use stream::{BoundedStream, ACTIVITY_FEED_CAPACITY, LOG_STREAM_CAPACITY};
pub use window::{plan, RenderPlan, Viewport, VisibleRange, WINDOWING_THRESHOLD};
