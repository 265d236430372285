//! Offset-based pull loop, used when no push transport is available and as
//! a reconciliation path after a push gap.
//!
//! The poller remembers a byte offset into the source's output and asks only
//! for what is new. A failed poll keeps the offset where it was, so the next
//! attempt re-requests the same range and nothing is skipped. Polling is
//! suspended while the consuming view is hidden and resumes with an
//! immediate poll, so a returning operator never waits a full interval for
//! fresh data.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use scope_core::{Entry, Notice, NoticeSeverity};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consecutive failures before the poller reports itself degraded.
pub const POLL_FAILURE_NOTICE_THRESHOLD: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("poll source unavailable: {0}")]
    Unavailable(String),
    #[error("poll source io error: {0}")]
    Io(#[from] std::io::Error),
}

/// One successful poll: any new lines plus the offset to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollBatch {
    pub lines: Vec<String>,
    pub next_offset: u64,
}

/// Something pollable for incremental output, usually a supervised process.
pub trait PollSource: Send + 'static {
    /// Fetches output past `offset`. `next_offset` in the batch may equal
    /// `offset` when nothing new arrived.
    fn poll(&mut self, offset: u64) -> BoxFuture<'_, Result<PollBatch, PollError>>;

    /// Writes a line of input to the source.
    fn send(&mut self, text: &str) -> BoxFuture<'_, Result<(), PollError>>;

    /// Whether the underlying process still accepts input.
    fn process_alive(&self) -> bool;
}

/// Updates emitted by a running [`Poller`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollUpdate {
    Entries(Vec<Entry>),
    /// Crossed the consecutive-failure threshold.
    Degraded { notice: Notice },
    /// First success after one or more failures.
    Recovered,
}

/// Handle to a spawned poll loop.
pub struct Poller {
    visible: watch::Sender<bool>,
    poke: Arc<Notify>,
    cancel: CancellationToken,
}

impl Poller {
    /// Spawns the poll loop. It polls once immediately, then every
    /// `interval` while visible.
    pub fn spawn<S: PollSource>(
        source: S,
        source_name: impl Into<String>,
        updates: mpsc::Sender<PollUpdate>,
        interval: Duration,
    ) -> Self {
        let (visible, visible_rx) = watch::channel(true);
        let poke = Arc::new(Notify::new());
        let cancel = CancellationToken::new();
        tokio::spawn(poll_loop(
            source,
            source_name.into(),
            updates,
            interval,
            visible_rx,
            poke.clone(),
            cancel.clone(),
        ));
        Self {
            visible,
            poke,
            cancel,
        }
    }

    /// Suspends or resumes polling. Resuming triggers an immediate poll.
    pub fn set_visible(&self, visible: bool) {
        let _ = self.visible.send(visible);
    }

    /// Requests one immediate poll, even while suspended. Used to reconcile
    /// after a push gap.
    pub fn poke(&self) {
        self.poke.notify_one();
    }

    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PollState {
    offset: u64,
    seq: u64,
    consecutive_failures: u32,
}

async fn poll_loop<S: PollSource>(
    mut source: S,
    source_name: String,
    updates: mpsc::Sender<PollUpdate>,
    interval: Duration,
    mut visible: watch::Receiver<bool>,
    poke: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut state = PollState {
        offset: 0,
        seq: 0,
        consecutive_failures: 0,
    };

    let mut poll_now = false;
    loop {
        // Park while hidden. A visibility flip back to true falls through
        // straight into a poll, no interval wait. A poke polls once even
        // while parked, whichever select caught it.
        if !poll_now {
            while !*visible.borrow() {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    changed = visible.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    () = poke.notified() => {
                        poll_now = true;
                        break;
                    }
                }
            }
        }
        poll_now = false;

        poll_once(&mut source, &source_name, &updates, &mut state).await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            () = tokio::time::sleep(interval) => {}
            changed = visible.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            () = poke.notified() => poll_now = true,
        }
    }
}

async fn poll_once<S: PollSource>(
    source: &mut S,
    source_name: &str,
    updates: &mpsc::Sender<PollUpdate>,
    state: &mut PollState,
) {
    match source.poll(state.offset).await {
        Ok(batch) => {
            if state.consecutive_failures > 0 {
                debug!(event = "poll_recovered", source = %source_name);
                let _ = updates.send(PollUpdate::Recovered).await;
            }
            state.consecutive_failures = 0;
            state.offset = batch.next_offset;
            if !batch.lines.is_empty() {
                let entries = batch
                    .lines
                    .into_iter()
                    .map(|line| {
                        state.seq += 1;
                        Entry::new(source_name, line, state.seq)
                    })
                    .collect();
                let _ = updates.send(PollUpdate::Entries(entries)).await;
            }
        }
        Err(err) => {
            // Offset stays put so the failed range is re-requested.
            state.consecutive_failures += 1;
            warn!(
                event = "poll_failed",
                source = %source_name,
                consecutive = state.consecutive_failures,
                error = %err,
            );
            if state.consecutive_failures == POLL_FAILURE_NOTICE_THRESHOLD {
                let notice = Notice {
                    severity: NoticeSeverity::Warn,
                    message: format!(
                        "{source_name}: {} consecutive poll failures",
                        state.consecutive_failures
                    ),
                };
                let _ = updates.send(PollUpdate::Degraded { notice }).await;
            }
        }
    }
}

/// Sends a line of input to a poll source, refusing if the process is gone.
pub async fn send_input<S: PollSource>(source: &mut S, text: &str) -> Result<(), PollError> {
    if !source.process_alive() {
        return Err(PollError::Unavailable("process has exited".to_string()));
    }
    source.send(text).await
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use futures_util::FutureExt;

    use super::*;

    /// Replays a scripted sequence of poll results and records the offsets
    /// it was asked for.
    struct ScriptedSource {
        script: VecDeque<Result<PollBatch, PollError>>,
        offsets_seen: Arc<Mutex<Vec<u64>>>,
        alive: bool,
        sent: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<PollBatch, PollError>>) -> Self {
            Self {
                script: script.into(),
                offsets_seen: Arc::new(Mutex::new(Vec::new())),
                alive: true,
                sent: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl PollSource for ScriptedSource {
        fn poll(&mut self, offset: u64) -> BoxFuture<'_, Result<PollBatch, PollError>> {
            self.offsets_seen.lock().unwrap().push(offset);
            let next = self.script.pop_front().unwrap_or(Ok(PollBatch {
                lines: Vec::new(),
                next_offset: offset,
            }));
            async move { next }.boxed()
        }

        fn send(&mut self, text: &str) -> BoxFuture<'_, Result<(), PollError>> {
            self.sent.lock().unwrap().push(text.to_string());
            async { Ok(()) }.boxed()
        }

        fn process_alive(&self) -> bool {
            self.alive
        }
    }

    fn batch(lines: &[&str], next_offset: u64) -> Result<PollBatch, PollError> {
        Ok(PollBatch {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            next_offset,
        })
    }

    fn unavailable() -> Result<PollBatch, PollError> {
        Err(PollError::Unavailable("gone".to_string()))
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn offset_advances_on_success_and_holds_on_failure() {
        let source = ScriptedSource::new(vec![
            batch(&["a", "b"], 120),
            unavailable(),
            batch(&["c"], 150),
        ]);
        let offsets = source.offsets_seen.clone();
        let (tx, mut rx) = mpsc::channel(16);
        let poller = Poller::spawn(source, "agent-1", tx, Duration::from_secs(1));

        settle().await;
        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;
        poller.close();

        // Failed poll at offset 120 re-requests 120.
        assert_eq!(offsets.lock().unwrap().as_slice(), &[0, 120, 120]);

        let first = rx.try_recv().expect("first batch");
        match first {
            PollUpdate::Entries(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].text, "a");
                assert_eq!(entries[0].source, "agent-1");
                assert_eq!(entries[0].seq, 1);
                assert_eq!(entries[1].seq, 2);
            }
            other => panic!("expected entries, got {other:?}"),
        }
        // Recovery after the single failure, then the retried batch.
        assert_eq!(rx.try_recv().expect("recovered"), PollUpdate::Recovered);
        match rx.try_recv().expect("retried batch") {
            PollUpdate::Entries(entries) => assert_eq!(entries[0].text, "c"),
            other => panic!("expected entries, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_notice_after_threshold_failures() {
        let source = ScriptedSource::new(vec![
            unavailable(),
            unavailable(),
            unavailable(),
            unavailable(),
            unavailable(),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let poller = Poller::spawn(source, "agent-2", tx, Duration::from_secs(1));

        for _ in 0..4 {
            settle().await;
            tokio::time::advance(Duration::from_millis(1001)).await;
        }
        settle().await;
        poller.close();

        // Exactly one degraded notice, at the third failure.
        let update = rx.try_recv().expect("degraded");
        match update {
            PollUpdate::Degraded { notice } => {
                assert_eq!(notice.severity, NoticeSeverity::Warn);
                assert!(notice.message.contains("agent-2"));
            }
            other => panic!("expected degraded, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_poller_stops_and_resumes_immediately() {
        let source = ScriptedSource::new(vec![
            batch(&[], 10),
            batch(&["after-resume"], 20),
        ]);
        let offsets = source.offsets_seen.clone();
        let (tx, mut rx) = mpsc::channel(16);
        let poller = Poller::spawn(source, "agent-3", tx, Duration::from_secs(1));

        settle().await;
        poller.set_visible(false);
        settle().await;

        // Hidden across many intervals: no further polls.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(offsets.lock().unwrap().len(), 1);

        // Resume polls right away, no interval wait.
        poller.set_visible(true);
        settle().await;
        assert_eq!(offsets.lock().unwrap().as_slice(), &[0, 10]);
        match rx.try_recv().expect("resume batch") {
            PollUpdate::Entries(entries) => assert_eq!(entries[0].text, "after-resume"),
            other => panic!("expected entries, got {other:?}"),
        }
        poller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn poke_polls_once_even_while_hidden() {
        let source = ScriptedSource::new(vec![batch(&[], 5), batch(&["poked"], 9)]);
        let offsets = source.offsets_seen.clone();
        let (tx, mut rx) = mpsc::channel(16);
        let poller = Poller::spawn(source, "agent-4", tx, Duration::from_secs(1));

        settle().await;
        poller.set_visible(false);
        settle().await;
        assert_eq!(offsets.lock().unwrap().len(), 1);

        poller.poke();
        settle().await;
        assert_eq!(offsets.lock().unwrap().as_slice(), &[0, 5]);
        match rx.try_recv().expect("poked batch") {
            PollUpdate::Entries(entries) => assert_eq!(entries[0].text, "poked"),
            other => panic!("expected entries, got {other:?}"),
        }

        // Still hidden afterwards: the interval does not run.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(offsets.lock().unwrap().len(), 2);
        poller.close();
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_pokes_each_poll_while_hidden() {
        let source = ScriptedSource::new(vec![
            batch(&[], 5),
            batch(&["one"], 9),
            batch(&["two"], 12),
        ]);
        let offsets = source.offsets_seen.clone();
        let (tx, _rx) = mpsc::channel(16);
        let poller = Poller::spawn(source, "agent-5", tx, Duration::from_secs(1));

        settle().await;
        poller.set_visible(false);
        settle().await;

        // First poke lands while parked, second while waiting out the
        // post-poll select. Both must result in a poll.
        poller.poke();
        settle().await;
        poller.poke();
        settle().await;
        assert_eq!(offsets.lock().unwrap().as_slice(), &[0, 5, 9]);

        // No interval polling sneaks in while still hidden.
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(offsets.lock().unwrap().len(), 3);
        poller.close();
    }

    #[tokio::test]
    async fn send_refused_when_process_dead() {
        let mut source = ScriptedSource::new(Vec::new());
        source.alive = false;
        let err = send_input(&mut source, "hello").await;
        assert!(matches!(err, Err(PollError::Unavailable(_))));
        assert!(source.sent.lock().unwrap().is_empty());

        source.alive = true;
        send_input(&mut source, "hello").await.expect("send ok");
        assert_eq!(source.sent.lock().unwrap().as_slice(), &["hello".to_string()]);
    }
}
