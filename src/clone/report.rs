//! Progress and outcome side channel.
//!
//! The engine never logs directly; it calls a [`CopyReporter`] handed to it
//! at construction. [`TracingReporter`] is what the binary uses.

use std::sync::Mutex;
use std::time::Duration;

use tracing::{error, info, warn};

use super::tally::CopyFailure;
use crate::core::{Key, Side};

pub trait CopyReporter: Send + Sync {
    /// An endpoint was opened. `target` is already redacted.
    fn endpoint_opened(&self, _side: Side, _kind: &str, _target: &str) {}

    /// One key was written (verbose runs only).
    fn copied(&self, _key: &Key) {}

    /// Periodic running total.
    fn progress(&self, _copied: u64) {}

    /// One key failed; called once per failure after the drain.
    fn failed(&self, _failure: &CopyFailure) {}

    /// The whole batch succeeded.
    fn finished(&self, _copied: u64, _elapsed: Duration) {}

    /// Enumeration of the source broke off. `copied` is what landed anyway.
    fn aborted(&self, _copied: u64, _reason: &str) {}
}

/// Emits one `tracing` event per report.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl CopyReporter for TracingReporter {
    fn endpoint_opened(&self, side: Side, kind: &str, target: &str) {
        info!("connected to {} {}: {}", kind, side, target);
    }

    fn copied(&self, key: &Key) {
        info!("copied {}", key);
    }

    fn progress(&self, copied: u64) {
        info!("copied {} keys", copied);
    }

    fn failed(&self, failure: &CopyFailure) {
        error!("{}", failure);
    }

    fn finished(&self, copied: u64, elapsed: Duration) {
        info!("copied {} keys in {:?}", copied, elapsed);
    }

    fn aborted(&self, copied: u64, reason: &str) {
        warn!(copied, "source enumeration aborted: {}", reason);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl CopyReporter for NullReporter {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportEvent {
    EndpointOpened {
        side: Side,
        kind: String,
        target: String,
    },
    Copied(Key),
    Progress(u64),
    Failed(CopyFailure),
    Finished(u64),
    Aborted(u64),
}

/// Keeps every report in memory, in call order.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<ReportEvent>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn progress_totals(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReportEvent::Progress(total) => Some(total),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReportEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl CopyReporter for RecordingReporter {
    fn endpoint_opened(&self, side: Side, kind: &str, target: &str) {
        self.push(ReportEvent::EndpointOpened {
            side,
            kind: kind.to_string(),
            target: target.to_string(),
        });
    }

    fn copied(&self, key: &Key) {
        self.push(ReportEvent::Copied(key.clone()));
    }

    fn progress(&self, copied: u64) {
        self.push(ReportEvent::Progress(copied));
    }

    fn failed(&self, failure: &CopyFailure) {
        self.push(ReportEvent::Failed(failure.clone()));
    }

    fn finished(&self, copied: u64, _elapsed: Duration) {
        self.push(ReportEvent::Finished(copied));
    }

    fn aborted(&self, copied: u64, _reason: &str) {
        self.push(ReportEvent::Aborted(copied));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::Arc;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Collects (level, message) for every event it sees.
    #[derive(Clone, Default)]
    struct CaptureLayer(Arc<Mutex<Vec<(Level, String)>>>);

    struct MessageVisitor(String);

    impl Visit for MessageVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: Subscriber> Layer<S> for CaptureLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut visitor = MessageVisitor(String::new());
            event.record(&mut visitor);
            self.0
                .lock()
                .unwrap()
                .push((*event.metadata().level(), visitor.0));
        }
    }

    fn capture(emit: impl FnOnce()) -> Vec<(Level, String)> {
        let layer = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(layer.clone());
        tracing::subscriber::with_default(subscriber, emit);
        let lines = layer.0.lock().unwrap().clone();
        lines
    }

    #[test]
    fn tracing_reporter_line_formats() {
        let failure = CopyFailure::new(Key::from("b"), "write rejected");
        let lines = capture(|| {
            let reporter = TracingReporter;
            reporter.endpoint_opened(Side::Source, "remote", "mongodb://u:xxxxx@h (hub.kvstore)");
            reporter.copied(&Key::from("a"));
            reporter.progress(200);
            reporter.failed(&failure);
            reporter.finished(3, Duration::from_millis(1500));
            reporter.aborted(2, "truncated value log");
        });

        assert_eq!(
            lines,
            vec![
                (
                    Level::INFO,
                    "connected to remote source: mongodb://u:xxxxx@h (hub.kvstore)".to_string()
                ),
                (Level::INFO, "copied a".to_string()),
                (Level::INFO, "copied 200 keys".to_string()),
                (Level::ERROR, "copying b: write rejected".to_string()),
                (Level::INFO, "copied 3 keys in 1.5s".to_string()),
                (
                    Level::WARN,
                    "source enumeration aborted: truncated value log".to_string()
                ),
            ]
        );
    }

    #[test]
    fn null_reporter_emits_nothing() {
        let lines = capture(|| {
            let reporter = NullReporter;
            reporter.progress(10);
            reporter.finished(10, Duration::from_secs(1));
        });
        assert!(lines.is_empty());
    }
}
