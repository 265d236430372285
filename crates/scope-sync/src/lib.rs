//! Async synchronization layer: the push transport with reconnect, the
//! polling fallback, and the refresh coordinator that sits between the
//! event stream and the views.

pub mod coordinator;
pub mod polling;
pub mod transport;

pub use coordinator::{Refresh, RefreshCoordinator};
pub use polling::{
    send_input, PollBatch, PollError, PollSource, PollUpdate, Poller, DEFAULT_POLL_INTERVAL,
    POLL_FAILURE_NOTICE_THRESHOLD,
};
pub use transport::{
    ConnectionState, Transport, TransportConfig, EVENT_BUS_CAPACITY, INITIAL_BACKOFF, MAX_BACKOFF,
};
