//! Declarative refresh policy: event type -> how downstream views react.
//!
//! Keeping the table here, away from timers and channels, lets the
//! coordinator stay a thin dispatcher and keeps the policy testable on its
//! own.

use std::time::Duration;

use crate::events::SwarmEvent;

/// Trailing debounce window for high-frequency event types.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(1000);

/// Severity of an operator-visible notice raised by a critical event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Info,
    Warn,
    Error,
}

/// User-visible side effect attached to an immediate refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub message: String,
}

/// What a single event does to refresh targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshAction {
    /// High-frequency: coalesce bursts; one refresh after a quiet window.
    Debounce { window: Duration },
    /// Low-frequency/critical: refresh now, optionally with a notice.
    Immediate { notice: Option<Notice> },
    /// Feeds streams directly; no data refresh triggered.
    None,
}

/// The policy table: what each event type means downstream.
pub fn refresh_action(event: &SwarmEvent) -> RefreshAction {
    match event {
        SwarmEvent::Heartbeat | SwarmEvent::Signal | SwarmEvent::Tasks => RefreshAction::Debounce {
            window: DEBOUNCE_WINDOW,
        },
        SwarmEvent::CircuitBreakerOpened { agent } => RefreshAction::Immediate {
            notice: Some(Notice {
                severity: NoticeSeverity::Warn,
                message: format!("circuit breaker opened for {agent}"),
            }),
        },
        SwarmEvent::CircuitBreakerClosed { agent } => RefreshAction::Immediate {
            notice: Some(Notice {
                severity: NoticeSeverity::Info,
                message: format!("circuit breaker closed for {agent}"),
            }),
        },
        SwarmEvent::SwarmComplete => RefreshAction::Immediate {
            notice: Some(Notice {
                severity: NoticeSeverity::Info,
                message: "swarm completed".to_string(),
            }),
        },
        SwarmEvent::SwarmFailed { error } => RefreshAction::Immediate {
            notice: Some(Notice {
                severity: NoticeSeverity::Error,
                message: format!("swarm failed: {error}"),
            }),
        },
        SwarmEvent::Log { .. } | SwarmEvent::FileChanged { .. } => RefreshAction::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_frequency_types_are_debounced() {
        for event in [SwarmEvent::Heartbeat, SwarmEvent::Signal, SwarmEvent::Tasks] {
            assert_eq!(
                refresh_action(&event),
                RefreshAction::Debounce {
                    window: DEBOUNCE_WINDOW
                }
            );
        }
    }

    #[test]
    fn critical_types_bypass_debounce_with_notice() {
        let action = refresh_action(&SwarmEvent::SwarmFailed {
            error: "oom".to_string(),
        });
        match action {
            RefreshAction::Immediate {
                notice: Some(notice),
            } => {
                assert_eq!(notice.severity, NoticeSeverity::Error);
                assert!(notice.message.contains("oom"));
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn stream_bearing_types_do_not_refresh() {
        let log = SwarmEvent::Log {
            agent: "a".to_string(),
            lines: Vec::new(),
        };
        assert_eq!(refresh_action(&log), RefreshAction::None);
    }
}
