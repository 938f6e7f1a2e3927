//! Trace contexts and the reloadable structured log sink
//!
//! This crate pairs two pieces a service needs around every unit of work:
//! - [`TraceContext`]: a concurrent-safe accumulator of ` key=value`
//!   annotations and named timings, flushed as one aggregated record
//!   (`Uuid=<id> cost=<elapsed> ...`) when the work completes, with
//!   warning/error paths that emit immediately and report call-site tuples
//!   to the monitor sink.
//! - [`LogSink`]: the process-wide leveled sink, rebuilt at runtime from a
//!   host-supplied [`LogConfig`] provider. [`init_log`] registers a
//!   provider and performs a reconfiguration pass; `tracekit-signals`
//!   drives the same pass from OS signals.
//!
//! Emission rides the `tracing` ecosystem: a layered subscriber whose
//! output layer (writer plus level filter) sits behind a reload handle and
//! is swapped wholesale on every pass.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub mod caller;
pub mod config;
pub mod context;
pub mod level;
pub mod sink;

pub use caller::{CallerFrame, UNKNOWN_FUNCTION};
pub use config::{init_log, reload_log, DefaultLogConfig, LogConfig};
pub use context::{
    log_debug, log_error, log_info, log_notice, log_warning, report_at, TraceContext,
};
pub use level::{LogLevel, ParseLevelError};
pub use sink::{active_sink, init_logger, LogSink, SinkSettings};
pub use tracekit_monitoring::Severity;

/// Errors surfaced by sink construction and reconfiguration passes.
///
/// Level-parse failures never reach here: the reconfiguration pass
/// substitutes `INFO` and carries on.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The file appender could not be created.
    #[error("failed to initialize log file appender: {0}")]
    Appender(#[from] tracing_appender::rolling::InitError),

    /// The log directory could not be created.
    #[error("failed to create log directory {}: {source}", .path.display())]
    LogDir {
        path: PathBuf,
        source: io::Error,
    },
}
