//! Sink construction and runtime reconfiguration.
//!
//! The process carries one active [`LogSink`] at a time. The first touch
//! installs a global subscriber whose output layer sits behind a reload
//! handle; every later [`init_logger`] builds a fresh layer (writer plus
//! filter) and swaps it through that handle, then replaces the shared sink
//! reference in a single `Arc` swap. Emitters racing a reconfiguration see
//! the old sink or the new one, never a half-built one.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter, MakeWriterExt};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::level::LogLevel;
use crate::LoggingError;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Configuration surface of one sink build.
///
/// `max_size` (megabytes), `max_backups` and `max_age` (days) describe the
/// rotation policy of the file target; the file itself is opened at the
/// exact configured path and refreshed on every reconfiguration pass, which
/// is the reopen hook external rotation relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSettings {
    /// Log file path; `None` sends output to the console stream exclusively.
    pub path: Option<PathBuf>,
    pub max_size: u32,
    pub max_backups: u32,
    pub max_age: u32,
    /// Minimum severity emitted.
    pub level: LogLevel,
    /// Mirror file output to the console stream as well.
    pub console: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_size: 1,
            max_backups: 5,
            max_age: 30,
            level: LogLevel::Debug,
            console: true,
        }
    }
}

/// ISO-8601 timestamps with millisecond precision.
struct IsoTimestamp;

impl FormatTime for IsoTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        use std::fmt::Write as _;
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%z"))
    }
}

/// File appender shared between the output layer and [`LogSink::sync`].
#[derive(Clone)]
struct SharedFile(Arc<Mutex<RollingFileAppender>>);

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

impl<'a> MakeWriter<'a> for SharedFile {
    type Writer = SharedFile;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// The process-wide leveled sink.
///
/// Encoding is fixed: ISO-8601 timestamp, uppercase level name, message.
/// Call frames are not decorated onto the line; attribution travels through
/// the monitor tuples instead.
pub struct LogSink {
    level: LogLevel,
    path: Option<PathBuf>,
    console: bool,
    file: Option<SharedFile>,
}

impl LogSink {
    fn assemble(settings: &SinkSettings, file: Option<SharedFile>) -> (Self, BoxedLayer) {
        let writer = match (&file, settings.console) {
            (Some(f), true) => BoxMakeWriter::new(io::stdout.and(f.clone())),
            (Some(f), false) => BoxMakeWriter::new(f.clone()),
            (None, _) => BoxMakeWriter::new(io::stdout),
        };
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_timer(IsoTimestamp)
            .with_writer(writer)
            .with_filter(EnvFilter::new(settings.level.filter_directive()))
            .boxed();
        let sink = Self {
            level: settings.level,
            path: settings.path.clone(),
            console: settings.console,
            file,
        };
        (sink, layer)
    }

    /// Emits `msg` when `level` clears the configured minimum.
    pub fn emit(&self, level: LogLevel, msg: &dyn fmt::Display) {
        if level < self.level {
            return;
        }
        match level {
            LogLevel::Debug => tracing::debug!("{}", msg),
            LogLevel::Info => tracing::info!("{}", msg),
            LogLevel::Warn => tracing::warn!("{}", msg),
            LogLevel::Error | LogLevel::Fatal | LogLevel::Panic => tracing::error!("{}", msg),
        }
    }

    pub fn debug(&self, msg: impl fmt::Display) {
        self.emit(LogLevel::Debug, &msg);
    }

    pub fn info(&self, msg: impl fmt::Display) {
        self.emit(LogLevel::Info, &msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        self.emit(LogLevel::Warn, &msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        self.emit(LogLevel::Error, &msg);
    }

    /// Emits at fatal severity, forces a sync, then exits the process.
    pub fn fatal(&self, msg: impl fmt::Display) -> ! {
        self.emit(LogLevel::Fatal, &msg);
        self.sync();
        std::process::exit(1);
    }

    /// Emits at panic severity, forces a sync, then unwinds.
    pub fn panic(&self, msg: impl fmt::Display) -> ! {
        let rendered = msg.to_string();
        self.emit(LogLevel::Panic, &rendered);
        self.sync();
        panic!("{}", rendered);
    }

    /// Flushes buffered output on every target.
    pub fn sync(&self) {
        if let Some(file) = &self.file {
            let _ = file.clone().flush();
        }
        let _ = io::stdout().flush();
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether the console stream receives output.
    pub fn console(&self) -> bool {
        self.path.is_none() || self.console
    }
}

static RELOAD: OnceCell<reload::Handle<BoxedLayer, Registry>> = OnceCell::new();

static ACTIVE: Lazy<RwLock<Arc<LogSink>>> = Lazy::new(|| {
    let (sink, layer) = LogSink::assemble(&SinkSettings::default(), None);
    install_layer(layer);
    RwLock::new(Arc::new(sink))
});

/// First call installs the global subscriber with the layer behind a reload
/// handle; later calls swap the layer through that handle. If a foreign
/// global subscriber is already installed, this sink stays inert.
fn install_layer(layer: BoxedLayer) {
    let mut pending = Some(layer);
    let handle = RELOAD.get_or_init(|| {
        let initial = pending.take().expect("first install consumes the layer");
        let (reload_layer, handle) = reload::Layer::new(initial);
        let _ = tracing_subscriber::registry().with(reload_layer).try_init();
        handle
    });
    if let Some(layer) = pending {
        let _ = handle.reload(layer);
    }
}

fn open_appender(path: &Path, max_backups: u32) -> Result<SharedFile, LoggingError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|source| LoggingError::LogDir {
        path: dir.clone(),
        source,
    })?;
    let name = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tracekit.log".to_string());
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .max_log_files(max_backups.max(1) as usize)
        .build(&dir)?;
    Ok(SharedFile(Arc::new(Mutex::new(appender))))
}

/// Builds a sink from `settings` and atomically replaces the process-wide
/// active one.
///
/// An absent path targets the console stream exclusively and the rotation
/// parameters are ignored. With a path, `console` fans output out to both
/// the console and the file target; otherwise the file alone receives it.
pub fn init_logger(settings: &SinkSettings) -> Result<(), LoggingError> {
    let file = match settings.path.as_deref() {
        Some(path) => Some(open_appender(path, settings.max_backups)?),
        None => None,
    };
    Lazy::force(&ACTIVE);
    let (sink, layer) = LogSink::assemble(settings, file);
    install_layer(layer);
    *ACTIVE.write() = Arc::new(sink);
    Ok(())
}

/// Current process-wide sink. Before any explicit initialization this is a
/// console sink at debug level built from [`SinkSettings::default`].
pub fn active_sink() -> Arc<LogSink> {
    ACTIVE.read().clone()
}
