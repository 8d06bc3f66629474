//! Progress reporting for sync runs.
//!
//! Events flow one way over a bounded channel. The reporter never blocks:
//! when the buffer is full or the observer has gone away the event is
//! dropped and counted, and the run carries on unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::report::{SyncResult, SyncRun};

/// Default channel capacity
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Progress event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Free-form status line
    Status { message: String },
    /// Position within the current source
    Progress {
        source_id: String,
        current: usize,
        total: usize,
        percent: u8,
        message: String,
    },
    Warning {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
    },
    /// One source finished
    SourceComplete { result: SyncResult },
    /// The run finished; always the last event
    Complete { summary: SyncRun },
}

/// Receiving half handed to the observer
pub struct ProgressChannel {
    receiver: mpsc::Receiver<ProgressEvent>,
}

impl ProgressChannel {
    /// Create a bounded progress channel
    pub fn new(capacity: usize) -> (ProgressReporter, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let reporter = ProgressReporter {
            sender: Some(sender),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (reporter, Self { receiver })
    }

    /// Receive the next progress event
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.recv().await
    }

    /// Receive without waiting
    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Sending half used by the orchestrator, fetch driver and sources
#[derive(Clone, Debug)]
pub struct ProgressReporter {
    sender: Option<mpsc::Sender<ProgressEvent>>,
    dropped: Arc<AtomicU64>,
}

impl ProgressReporter {
    /// Reporter with no observer; every event is discarded
    pub fn disabled() -> Self {
        Self {
            sender: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send an event if there is room; never waits
    pub fn send(&self, event: ProgressEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        if sender.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events that could not be delivered
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Status {
            message: message.into(),
        });
    }

    pub fn progress(&self, source_id: &str, current: usize, total: usize, message: impl Into<String>) {
        self.send(ProgressEvent::Progress {
            source_id: source_id.to_string(),
            current,
            total,
            percent: percent(current, total),
            message: message.into(),
        });
    }

    pub fn warning(&self, source_id: Option<&str>, message: impl Into<String>) {
        self.send(ProgressEvent::Warning {
            message: message.into(),
            source_id: source_id.map(str::to_string),
        });
    }

    pub fn error(&self, source_id: Option<&str>, message: impl Into<String>) {
        self.send(ProgressEvent::Error {
            message: message.into(),
            source_id: source_id.map(str::to_string),
        });
    }

    pub fn source_complete(&self, result: &SyncResult) {
        self.send(ProgressEvent::SourceComplete {
            result: result.clone(),
        });
    }

    pub fn complete(&self, run: &SyncRun) {
        self.send(ProgressEvent::Complete {
            summary: run.clone(),
        });
    }
}

/// Whole-number percentage, clamped to 100
pub fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((current.min(total) * 100) / total) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (reporter, mut channel) = ProgressChannel::new(8);
        reporter.status("starting");
        reporter.progress("feed", 1, 4, "one");

        assert_eq!(
            channel.recv().await,
            Some(ProgressEvent::Status {
                message: "starting".to_string()
            })
        );
        match channel.recv().await {
            Some(ProgressEvent::Progress { percent, current, .. }) => {
                assert_eq!(current, 1);
                assert_eq!(percent, 25);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_full_buffer_drops_instead_of_blocking() {
        let (reporter, _channel) = ProgressChannel::new(2);
        for i in 0..5 {
            reporter.status(format!("event {}", i));
        }
        assert_eq!(reporter.dropped(), 3);
    }

    #[test]
    fn test_closed_observer_does_not_fail_sender() {
        let (reporter, channel) = ProgressChannel::new(2);
        drop(channel);
        reporter.warning(Some("feed"), "still fine");
        assert_eq!(reporter.dropped(), 1);

        let disabled = ProgressReporter::disabled();
        disabled.status("nobody listening");
        assert_eq!(disabled.dropped(), 0);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let json = serde_json::to_value(ProgressEvent::Warning {
            message: "slow".to_string(),
            source_id: None,
        })
        .unwrap();
        assert_eq!(json["type"], "warning");
        assert!(json.get("source_id").is_none());
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(3, 3), 100);
        assert_eq!(percent(7, 3), 100);
        assert_eq!(percent(1, 3), 33);
    }
}
