//! Turns the raw event stream into per-target refresh requests.
//!
//! High-frequency event types are coalesced with a trailing debounce: each
//! qualifying event resets a single pending timer per target, and when the
//! timer finally fires exactly one refresh goes out, reflecting the most
//! recent state. Critical events bypass the debounce and additionally raise
//! an operator-visible notice.
//!
//! Which event type does what is the policy table in
//! `scope_core::refresh`; this module owns only timers and channels.

use scope_core::{refresh_action, EventFrame, Notice, RefreshAction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A request to re-fetch one named data target (status, agents, history, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refresh {
    pub target: String,
    /// Event type that triggered the refresh, for logging.
    pub cause: &'static str,
}

struct Target {
    name: String,
    pending: Option<JoinHandle<()>>,
}

/// Per-view dispatcher. Debounce timers are private per-registration state;
/// `shutdown` (or drop) cancels them so an abandoned timer never fires
/// against a torn-down target.
pub struct RefreshCoordinator {
    refresh_tx: mpsc::Sender<Refresh>,
    notice_tx: mpsc::Sender<Notice>,
    targets: Vec<Target>,
    cancel: CancellationToken,
}

impl RefreshCoordinator {
    pub fn new(refresh_tx: mpsc::Sender<Refresh>, notice_tx: mpsc::Sender<Notice>) -> Self {
        Self {
            refresh_tx,
            notice_tx,
            targets: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Registers a named refresh target. Each target's debounce state is
    /// independent.
    pub fn register(&mut self, name: impl Into<String>) {
        self.targets.push(Target {
            name: name.into(),
            pending: None,
        });
    }

    pub fn handle(&mut self, frame: &EventFrame) {
        let cause = frame.event.type_name();
        match refresh_action(&frame.event) {
            RefreshAction::None => {}
            RefreshAction::Immediate { notice } => {
                for target in &mut self.targets {
                    if let Some(pending) = target.pending.take() {
                        pending.abort();
                    }
                    let _ = self.refresh_tx.try_send(Refresh {
                        target: target.name.clone(),
                        cause,
                    });
                }
                if let Some(notice) = notice {
                    let _ = self.notice_tx.try_send(notice);
                }
            }
            RefreshAction::Debounce { window } => {
                for target in &mut self.targets {
                    if let Some(pending) = target.pending.take() {
                        pending.abort();
                    }
                    let refresh_tx = self.refresh_tx.clone();
                    let name = target.name.clone();
                    let cancel = self.cancel.child_token();
                    target.pending = Some(tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            () = tokio::time::sleep(window) => {
                                debug!(event = "refresh_debounce_fired", target = %name, cause);
                                let _ = refresh_tx.try_send(Refresh { target: name, cause });
                            }
                        }
                    }));
                }
            }
        }
    }

    /// Cancels all pending debounce timers. Idempotent.
    pub fn shutdown(&mut self) {
        self.cancel.cancel();
        for target in &mut self.targets {
            if let Some(pending) = target.pending.take() {
                pending.abort();
            }
        }
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use scope_core::{NoticeSeverity, SwarmEvent};

    use super::*;

    fn frame(seq: u64, event: SwarmEvent) -> EventFrame {
        EventFrame::new(seq, event)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_one_refresh_after_quiet_window() {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
        let (notice_tx, _notice_rx) = mpsc::channel(16);
        let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
        coordinator.register("status");

        // Five heartbeats at t=0,50,100,150,200ms. The settle between
        // handle and advance lets the spawned timer register its deadline.
        for seq in 0..5 {
            coordinator.handle(&frame(seq, SwarmEvent::Heartbeat));
            settle().await;
            if seq < 4 {
                tokio::time::advance(Duration::from_millis(50)).await;
            }
        }

        // 999ms after the last event: still quiet.
        tokio::time::advance(Duration::from_millis(999)).await;
        settle().await;
        assert!(refresh_rx.try_recv().is_err());

        // Window elapses: exactly one refresh, at ~1200ms overall.
        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;
        let refresh = refresh_rx.try_recv().expect("one refresh");
        assert_eq!(refresh.target, "status");
        assert_eq!(refresh.cause, "heartbeat");
        assert!(refresh_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn critical_event_fires_immediately_with_notice() {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
        let (notice_tx, mut notice_rx) = mpsc::channel(16);
        let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
        coordinator.register("agents");

        coordinator.handle(&frame(
            1,
            SwarmEvent::CircuitBreakerOpened {
                agent: "coder".to_string(),
            },
        ));

        // No time advanced: refresh and notice are already there.
        let refresh = refresh_rx.try_recv().expect("immediate refresh");
        assert_eq!(refresh.cause, "circuit_breaker_opened");
        let notice = notice_rx.try_recv().expect("notice");
        assert_eq!(notice.severity, NoticeSeverity::Warn);
        assert!(notice.message.contains("coder"));
    }

    #[tokio::test(start_paused = true)]
    async fn each_target_gets_its_own_refresh() {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
        let (notice_tx, _notice_rx) = mpsc::channel(16);
        let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
        coordinator.register("status");
        coordinator.register("agents");
        coordinator.register("stats");

        coordinator.handle(&frame(1, SwarmEvent::Tasks));
        settle().await;
        tokio::time::advance(Duration::from_millis(1001)).await;
        settle().await;

        let mut targets = Vec::new();
        while let Ok(refresh) = refresh_rx.try_recv() {
            targets.push(refresh.target);
        }
        targets.sort();
        assert_eq!(targets, vec!["agents", "stats", "status"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
        let (notice_tx, _notice_rx) = mpsc::channel(16);
        let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
        coordinator.register("history");

        coordinator.handle(&frame(1, SwarmEvent::Signal));
        coordinator.shutdown();

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert!(
            refresh_rx.try_recv().is_err(),
            "no refresh may fire after teardown"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn log_events_do_not_trigger_refreshes() {
        let (refresh_tx, mut refresh_rx) = mpsc::channel(16);
        let (notice_tx, _notice_rx) = mpsc::channel(16);
        let mut coordinator = RefreshCoordinator::new(refresh_tx, notice_tx);
        coordinator.register("status");

        coordinator.handle(&frame(
            1,
            SwarmEvent::Log {
                agent: "a".to_string(),
                lines: vec!["x".to_string()],
            },
        ));
        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(refresh_rx.try_recv().is_err());
    }
}
