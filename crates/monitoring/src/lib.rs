//! Monitor sink for the tracekit workspace
//!
//! Warning/error/fatal/panic events are reported here as structured
//! `(name, function, file, line, severity)` tuples, independently of the
//! log stream, so alerting keeps working however the log sink is routed.
//! The backend is opaque: hosts register anything implementing
//! [`MonitorSink`]; until then events are discarded.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// Severity attached to a monitor event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warn,
    Error,
    Fatal,
    Panic,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Severity::Warn => "warn",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
            Severity::Panic => "panic",
        };
        f.write_str(tag)
    }
}

/// One alerting event.
///
/// `name` distinguishes explicitly named reports from the unnamed variants,
/// for which it is empty. `file` carries only the base name of the source
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub name: String,
    pub function: String,
    pub file: String,
    pub line: u32,
    pub severity: Severity,
}

impl MonitorEvent {
    /// Builds an event, reducing `file` to its base name.
    pub fn new(
        name: impl Into<String>,
        function: impl Into<String>,
        file: &str,
        line: u32,
        severity: Severity,
    ) -> Self {
        let file = Path::new(file)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or(file)
            .to_string();
        Self {
            name: name.into(),
            function: function.into(),
            file,
            line,
            severity,
        }
    }
}

/// Capability an external alerting collector implements.
pub trait MonitorSink: Send + Sync {
    /// Records one event. Must not block the caller for long.
    fn record(&self, event: MonitorEvent);
}

/// Default sink; events are discarded until a host registers a collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMonitor;

impl MonitorSink for NullMonitor {
    fn record(&self, _event: MonitorEvent) {}
}

/// In-memory sink retaining every event, in arrival order.
///
/// Useful in tests and for hosts that scrape counters instead of pushing
/// to an external collector.
#[derive(Default)]
pub struct CollectingMonitor {
    events: Mutex<Vec<MonitorEvent>>,
}

impl CollectingMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<MonitorEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded events at `severity`.
    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity == severity)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MonitorSink for CollectingMonitor {
    fn record(&self, event: MonitorEvent) {
        self.events.lock().push(event);
    }
}

static ACTIVE: Lazy<RwLock<Arc<dyn MonitorSink>>> = Lazy::new(|| {
    let sink: Arc<dyn MonitorSink> = Arc::new(NullMonitor);
    RwLock::new(sink)
});

/// Replaces the process-wide monitor sink.
pub fn set_monitor(sink: Arc<dyn MonitorSink>) {
    *ACTIVE.write() = sink;
}

/// Current process-wide monitor sink.
pub fn monitor() -> Arc<dyn MonitorSink> {
    ACTIVE.read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_tags_render_lowercase() {
        assert_eq!(Severity::Warn.to_string(), "warn");
        assert_eq!(Severity::Error.to_string(), "error");
        assert_eq!(Severity::Fatal.to_string(), "fatal");
        assert_eq!(Severity::Panic.to_string(), "panic");
    }

    #[test]
    fn event_file_is_reduced_to_base_name() {
        let event = MonitorEvent::new(
            "",
            "svc::handler",
            "/srv/app/src/handler.rs",
            42,
            Severity::Error,
        );
        assert_eq!(event.file, "handler.rs");
        assert_eq!(event.line, 42);
    }

    #[test]
    fn collecting_monitor_counts_by_severity() {
        let collector = CollectingMonitor::new();
        collector.record(MonitorEvent::new("", "a", "a.rs", 1, Severity::Warn));
        collector.record(MonitorEvent::new("queue", "b", "b.rs", 2, Severity::Error));
        collector.record(MonitorEvent::new("", "c", "c.rs", 3, Severity::Warn));

        assert_eq!(collector.events().len(), 3);
        assert_eq!(collector.count(Severity::Warn), 2);
        assert_eq!(collector.count(Severity::Error), 1);
        assert_eq!(collector.count(Severity::Panic), 0);

        collector.clear();
        assert!(collector.events().is_empty());
    }

    #[test]
    fn registered_sink_receives_reports() {
        let collector = Arc::new(CollectingMonitor::new());
        set_monitor(collector.clone());

        monitor().record(MonitorEvent::new(
            "disk",
            "svc::poll",
            "poll.rs",
            7,
            Severity::Fatal,
        ));

        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "disk");
        assert_eq!(events[0].severity, Severity::Fatal);
    }
}
