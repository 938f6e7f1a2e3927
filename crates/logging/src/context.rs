//! Per-unit-of-work trace context.
//!
//! A context accumulates ` key=value` annotations and named timings
//! silently while a request or job runs, then [`flush`](TraceContext::flush)
//! emits them as one aggregated record. Warning and error paths bypass the
//! buffer: they emit immediately and report the call site to the monitor
//! sink, so urgent events surface in real time on an independent alerting
//! path.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracekit_monitoring::{monitor, MonitorEvent, Severity};
use uuid::Uuid;

use crate::caller::CallerFrame;
use crate::sink::active_sink;

/// Accumulator for one unit of work.
///
/// The annotation buffer is append-only until [`flush`](Self::flush), which
/// reads it without truncating: a context can keep accumulating and flush
/// again, reporting a grown duration and repeated content.
pub struct TraceContext {
    id: RwLock<String>,
    buf: Mutex<String>,
    started: Instant,
    /// Scratch mark in nanoseconds since `started`; zero means unset. Shared
    /// without a lock: start/stop pairs are single-writer per context, and
    /// concurrent pairs skew the measured durations.
    scratch: AtomicU64,
}

impl TraceContext {
    /// Creates a context seeded with `label`, a fresh correlation id and the
    /// current time.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: RwLock::new(Uuid::new_v4().to_string()),
            buf: Mutex::new(label.into()),
            started: Instant::now(),
            scratch: AtomicU64::new(0),
        }
    }

    /// Adopts an externally supplied correlation id. Empty input is a no-op.
    pub fn set_correlation_id(&self, id: impl Into<String>) {
        let id = id.into();
        if !id.is_empty() {
            *self.id.write() = id;
        }
    }

    /// Current correlation id. Guarded by its own lock, never the annotation
    /// buffer's, so reads do not contend with `add_notes`/`stop_timer`.
    pub fn correlation_id(&self) -> String {
        self.id.read().clone()
    }

    /// Marks the start of a named sub-span; pair with
    /// [`stop_timer`](Self::stop_timer).
    pub fn start_timer(&self) {
        self.scratch
            .store(self.started.elapsed().as_nanos() as u64, Ordering::Relaxed);
    }

    /// Appends ` key=<elapsed>` for the span opened by the last
    /// [`start_timer`](Self::start_timer).
    ///
    /// Without a prior `start_timer` the mark is zero, so the elapsed value
    /// is the time since context creation.
    pub fn stop_timer(&self, key: &str) {
        let mark = Duration::from_nanos(self.scratch.load(Ordering::Relaxed));
        let elapsed = self.started.elapsed().saturating_sub(mark);
        self.append(key, &format_args!("{:?}", elapsed));
    }

    /// Appends a ` key=value` annotation; `value` uses its `Display` form.
    pub fn add_notes(&self, key: &str, value: impl fmt::Display) {
        self.append(key, &value);
    }

    fn append(&self, key: &str, value: &dyn fmt::Display) {
        use std::fmt::Write as _;
        let mut buf = self.buf.lock();
        let _ = write!(buf, " {}={}", key, value);
    }

    /// Renders the aggregated record: `Uuid=<id> cost=<elapsed> <fragments>`.
    pub fn summary(&self) -> String {
        let cost = self.started.elapsed();
        let buf = self.buf.lock().clone();
        format!("Uuid={} cost={:?} {}", self.correlation_id(), cost, buf)
    }

    /// Emits the aggregated record at info level and forces the sink to
    /// persist it. Non-destructive; the context stays usable.
    pub fn flush(&self) {
        let sink = active_sink();
        sink.info(self.summary());
        sink.sync();
    }

    /// Debug-level pass-through to the active sink.
    pub fn debug(&self, msg: impl fmt::Display) {
        active_sink().debug(msg);
    }

    /// Info-level pass-through to the active sink.
    pub fn info(&self, msg: impl fmt::Display) {
        active_sink().info(msg);
    }

    /// Notice-level messages are emitted at debug severity.
    pub fn notice(&self, msg: impl fmt::Display) {
        active_sink().debug(msg);
    }

    /// Explicit-frame reporting entry point: records the monitor tuple,
    /// then emits. Wrapper layers capture their own [`CallerFrame`] and call
    /// this directly so attribution points at their caller.
    pub fn report(
        &self,
        severity: Severity,
        monitor_name: &str,
        frame: CallerFrame,
        msg: impl fmt::Display,
    ) {
        report_at(severity, monitor_name, frame, msg);
    }

    /// Warning-level emit, also reported to the monitor sink.
    #[track_caller]
    pub fn warning(&self, msg: impl fmt::Display) {
        report_at(Severity::Warn, "", CallerFrame::here(), msg);
    }

    /// Warning-level emit reported under an explicit monitor name.
    #[track_caller]
    pub fn warning_monitor(&self, name: &str, msg: impl fmt::Display) {
        report_at(Severity::Warn, name, CallerFrame::here(), msg);
    }

    /// Error-level emit, also reported to the monitor sink.
    #[track_caller]
    pub fn error(&self, msg: impl fmt::Display) {
        report_at(Severity::Error, "", CallerFrame::here(), msg);
    }

    /// Error-level emit reported under an explicit monitor name.
    #[track_caller]
    pub fn error_monitor(&self, name: &str, msg: impl fmt::Display) {
        report_at(Severity::Error, name, CallerFrame::here(), msg);
    }

    /// Reports to the monitor sink, emits, then exits the process.
    #[track_caller]
    pub fn fatal(&self, msg: impl fmt::Display) -> ! {
        record(Severity::Fatal, "", CallerFrame::here());
        active_sink().fatal(msg)
    }

    /// Reports to the monitor sink, emits, then unwinds.
    #[track_caller]
    pub fn panic(&self, msg: impl fmt::Display) -> ! {
        record(Severity::Panic, "", CallerFrame::here());
        active_sink().panic(msg)
    }
}

fn record(severity: Severity, monitor_name: &str, frame: CallerFrame) {
    monitor().record(MonitorEvent::new(
        monitor_name,
        frame.function(),
        frame.file(),
        frame.line(),
        severity,
    ));
}

/// Records the monitor tuple for `frame`, then emits `msg` at `severity`.
/// Shared by the context methods, the free functions and the callsite
/// macros.
pub fn report_at(severity: Severity, monitor_name: &str, frame: CallerFrame, msg: impl fmt::Display) {
    record(severity, monitor_name, frame);
    let sink = active_sink();
    match severity {
        Severity::Warn => sink.warn(msg),
        Severity::Error => sink.error(msg),
        Severity::Fatal => sink.fatal(msg),
        Severity::Panic => sink.panic(msg),
    }
}

/// Warning-level emit outside any tracked unit of work; reported to the
/// monitor sink.
#[track_caller]
pub fn log_warning(msg: impl fmt::Display) {
    report_at(Severity::Warn, "", CallerFrame::here(), msg);
}

/// Error-level emit outside any tracked unit of work; reported to the
/// monitor sink.
#[track_caller]
pub fn log_error(msg: impl fmt::Display) {
    report_at(Severity::Error, "", CallerFrame::here(), msg);
}

/// Debug-level emit outside any tracked unit of work.
pub fn log_debug(msg: impl fmt::Display) {
    active_sink().debug(msg);
}

/// Info-level emit outside any tracked unit of work.
pub fn log_info(msg: impl fmt::Display) {
    active_sink().info(msg);
}

/// Notice-level emit; maps to debug severity.
pub fn log_notice(msg: impl fmt::Display) {
    active_sink().debug(msg);
}

/// Warning emit capturing the enclosing function in the monitor report.
#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::report_at(
            $crate::Severity::Warn,
            "",
            $crate::caller_frame!(),
            format_args!($($arg)*),
        )
    };
}

/// Error emit capturing the enclosing function in the monitor report.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::report_at(
            $crate::Severity::Error,
            "",
            $crate::caller_frame!(),
            format_args!($($arg)*),
        )
    };
}

/// Context warning emit capturing the enclosing function in the monitor
/// report.
#[macro_export]
macro_rules! ctx_warning {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.report(
            $crate::Severity::Warn,
            "",
            $crate::caller_frame!(),
            format_args!($($arg)*),
        )
    };
}

/// Context error emit capturing the enclosing function in the monitor
/// report.
#[macro_export]
macro_rules! ctx_error {
    ($ctx:expr, $($arg:tt)*) => {
        $ctx.report(
            $crate::Severity::Error,
            "",
            $crate::caller_frame!(),
            format_args!($($arg)*),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    /// Parses the debug form of a `Duration` into milliseconds.
    fn duration_ms(s: &str) -> f64 {
        if let Some(v) = s.strip_suffix("ms") {
            v.parse().unwrap()
        } else if let Some(v) = s.strip_suffix("µs") {
            v.parse::<f64>().unwrap() / 1_000.0
        } else if let Some(v) = s.strip_suffix("ns") {
            v.parse::<f64>().unwrap() / 1_000_000.0
        } else if let Some(v) = s.strip_suffix('s') {
            v.parse::<f64>().unwrap() * 1_000.0
        } else {
            panic!("unexpected duration form: {s}");
        }
    }

    fn fragment<'a>(summary: &'a str, key: &str) -> &'a str {
        let marker = format!(" {key}=");
        summary
            .split(&marker)
            .nth(1)
            .unwrap_or_else(|| panic!("missing fragment {key} in {summary}"))
            .split(' ')
            .next()
            .unwrap()
    }

    #[test]
    fn fragments_appear_in_call_order_exactly_once() {
        let ctx = TraceContext::new("job-start");
        ctx.add_notes("user", "alice");
        ctx.add_notes("status", "ok");

        let summary = ctx.summary();
        assert!(summary.starts_with(&format!("Uuid={} cost=", ctx.correlation_id())));
        assert!(summary.ends_with("job-start user=alice status=ok"));
        assert_eq!(summary.matches("user=alice").count(), 1);
    }

    #[test]
    fn generated_correlation_id_is_uuid_shaped() {
        let ctx = TraceContext::new("job");
        let id = ctx.correlation_id();
        assert_eq!(id.len(), 36);
        assert_eq!(id.matches('-').count(), 4);
    }

    #[test]
    fn empty_correlation_id_is_ignored() {
        let ctx = TraceContext::new("job");
        let generated = ctx.correlation_id();

        ctx.set_correlation_id("");
        assert_eq!(ctx.correlation_id(), generated);

        ctx.set_correlation_id("req-7f3a");
        assert_eq!(ctx.correlation_id(), "req-7f3a");
    }

    #[test]
    fn flush_cost_never_decreases() {
        let ctx = TraceContext::new("job");
        let first = duration_ms(fragment(&ctx.summary(), "cost"));
        sleep(Duration::from_millis(5));
        let second = duration_ms(fragment(&ctx.summary(), "cost"));
        assert!(second >= first);
    }

    #[test]
    fn timed_span_covers_the_slept_interval() {
        let ctx = TraceContext::new("job");
        ctx.start_timer();
        sleep(Duration::from_millis(50));
        ctx.stop_timer("db");

        let elapsed = duration_ms(fragment(&ctx.summary(), "db"));
        assert!(elapsed >= 50.0, "span too short: {elapsed}ms");
    }

    #[test]
    fn stop_without_start_measures_from_creation() {
        let ctx = TraceContext::new("job");
        sleep(Duration::from_millis(2));
        ctx.stop_timer("lone");

        let elapsed = duration_ms(fragment(&ctx.summary(), "lone"));
        assert!(elapsed >= 0.0);
        assert!(elapsed.is_finite());
    }

    #[test]
    fn values_render_through_display() {
        let ctx = TraceContext::new("job");
        ctx.add_notes("rows", 128);
        ctx.add_notes("ratio", 0.5);
        let summary = ctx.summary();
        assert!(summary.contains(" rows=128"));
        assert!(summary.contains(" ratio=0.5"));
    }
}
