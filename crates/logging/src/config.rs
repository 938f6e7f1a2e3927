//! Configuration provider binding and the reconfiguration pass.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::level::LogLevel;
use crate::sink::{init_logger, SinkSettings};
use crate::LoggingError;

/// Capability a host implements to supply logger configuration on demand.
///
/// Read only during reconfiguration passes, which are infrequent
/// signal-triggered events.
pub trait LogConfig: Send + Sync {
    /// Destination path; empty means console-only output.
    fn path(&self) -> String;
    /// Rotation size bound, in megabytes.
    fn max_size(&self) -> u32;
    /// Rotated files kept around.
    fn max_backups(&self) -> u32;
    /// Retention age bound, in days.
    fn max_age(&self) -> u32;
    /// Textual level name, parsed case-insensitively against the fixed
    /// vocabulary; anything else falls back to `INFO`.
    fn level(&self) -> String;
    /// Mirror file output to the console stream.
    fn console(&self) -> bool;
}

/// Built-in provider used until a host registers one: console output at
/// debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLogConfig;

impl LogConfig for DefaultLogConfig {
    fn path(&self) -> String {
        String::new()
    }

    fn max_size(&self) -> u32 {
        1
    }

    fn max_backups(&self) -> u32 {
        5
    }

    fn max_age(&self) -> u32 {
        30
    }

    fn level(&self) -> String {
        "DEBUG".to_string()
    }

    fn console(&self) -> bool {
        true
    }
}

static PROVIDER: Lazy<RwLock<Arc<dyn LogConfig>>> = Lazy::new(|| {
    let provider: Arc<dyn LogConfig> = Arc::new(DefaultLogConfig);
    RwLock::new(provider)
});

fn provider() -> Arc<dyn LogConfig> {
    PROVIDER.read().clone()
}

/// One reconfiguration pass: re-reads the registered provider and rebuilds
/// the active sink. An unparseable level name degrades to `INFO` instead of
/// failing the pass.
pub fn reload_log() -> Result<(), LoggingError> {
    let config = provider();
    let path = config.path();
    let settings = SinkSettings {
        path: if path.is_empty() { None } else { Some(path.into()) },
        max_size: config.max_size(),
        max_backups: config.max_backups(),
        max_age: config.max_age(),
        level: config.level().parse().unwrap_or(LogLevel::Info),
        console: config.console(),
    };
    init_logger(&settings)
}

/// Registers `provider` when present, then performs one reconfiguration
/// pass either way, returning that pass's result.
pub fn init_log(provider: Option<Arc<dyn LogConfig>>) -> Result<(), LoggingError> {
    if let Some(provider) = provider {
        *PROVIDER.write() = provider;
    }
    reload_log()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_provider_defaults() {
        let config = DefaultLogConfig;
        assert_eq!(config.path(), "");
        assert_eq!(config.max_size(), 1);
        assert_eq!(config.max_backups(), 5);
        assert_eq!(config.max_age(), 30);
        assert_eq!(config.level(), "DEBUG");
        assert!(config.console());
    }
}
