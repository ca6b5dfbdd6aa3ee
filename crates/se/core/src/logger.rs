//! Pluggable logging for protocol layers
//!
//! Layers do not own their logger. A single [`SharedLogger`] is handed down the
//! stack with [`ProtocolLayer::set_logger`](crate::ProtocolLayer::set_logger)
//! and every layer emits records tagged with its own source name.

use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use derive_more::Display;
use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, function, module};

/// Severity of a log record
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum LogLevel {
    /// Verbose diagnostics
    #[display("DEBUG")]
    Debug = 0,
    /// Informational messages such as APDU traces
    #[display("INFO")]
    Info = 1,
    /// Recoverable anomalies
    #[display("WARNING")]
    Warn = 2,
    /// Failed operations
    #[display("ERROR")]
    Error = 3,
    /// Unrecoverable failures
    #[display("FATAL")]
    #[default]
    Fatal = 4,
}

impl TryFrom<u8> for LogLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        Ok(match value {
            0 => Self::Debug,
            1 => Self::Info,
            2 => Self::Warn,
            3 => Self::Error,
            4 => Self::Fatal,
            _ => {
                return Err(Error::new(module::LOGGER, function::SET_PROPERTY, ErrorKind::IllegalArgument));
            }
        })
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            _ => Err(Error::new(module::LOGGER, function::SET_PROPERTY, ErrorKind::IllegalArgument)),
        }
    }
}

/// Minimum level storage shared by the logger implementations
#[derive(Debug)]
pub struct LevelFilter(AtomicU8);

impl Default for LevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::default())
    }
}

impl LevelFilter {
    /// Create a filter starting at `level`
    pub const fn new(level: LogLevel) -> Self {
        Self(AtomicU8::new(level as u8))
    }

    /// Current minimum level
    pub fn get(&self) -> LogLevel {
        LogLevel::try_from(self.0.load(Ordering::Relaxed)).unwrap_or_default()
    }

    /// Replace the minimum level
    pub fn set(&self, level: LogLevel) {
        self.0.store(level as u8, Ordering::Relaxed);
    }
}

/// Destination for log records
pub trait Logger: fmt::Debug + Send + Sync {
    /// Emit a record that already passed the level filter
    fn write(&self, source: &str, level: LogLevel, message: &str);

    /// Minimum level that is emitted
    fn level(&self) -> LogLevel;

    /// Change the minimum level
    fn set_level(&self, level: LogLevel);

    /// Emit `message` if `level` is not below the configured minimum
    fn log(&self, source: &str, level: LogLevel, message: &str) {
        if level >= self.level() {
            self.write(source, level, message);
        }
    }

    /// Emit `prefix` followed by `data` as lowercase hex joined by `delimiter`
    fn log_bytes(&self, source: &str, level: LogLevel, prefix: &str, data: &[u8], delimiter: &str) {
        if level < self.level() {
            return;
        }
        let mut message = String::with_capacity(prefix.len() + data.len() * (2 + delimiter.len()));
        message.push_str(prefix);
        for (i, byte) in data.iter().enumerate() {
            if i > 0 {
                message.push_str(delimiter);
            }
            message.push_str(&hex::encode([*byte]));
        }
        self.write(source, level, &message);
    }
}

/// Logger shared across the layers of a stack
pub type SharedLogger = Arc<dyn Logger>;

/// Optional logger reference held by a layer
#[derive(Clone, Default)]
pub struct LogHandle(Option<SharedLogger>);

impl LogHandle {
    /// Handle that forwards to `logger`
    pub const fn new(logger: SharedLogger) -> Self {
        Self(Some(logger))
    }

    /// Replace the logger
    pub fn set(&mut self, logger: Option<SharedLogger>) {
        self.0 = logger;
    }

    /// Current logger
    pub const fn get(&self) -> Option<&SharedLogger> {
        self.0.as_ref()
    }

    /// Forward to [`Logger::log`] when a logger is attached
    pub fn log(&self, source: &str, level: LogLevel, message: &str) {
        if let Some(logger) = &self.0 {
            logger.log(source, level, message);
        }
    }

    /// Forward to [`Logger::log_bytes`] when a logger is attached
    pub fn log_bytes(&self, source: &str, level: LogLevel, prefix: &str, data: &[u8], delimiter: &str) {
        if let Some(logger) = &self.0 {
            logger.log_bytes(source, level, prefix, data, delimiter);
        }
    }
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LogHandle").field(&self.0.is_some()).finish()
    }
}

/// Logger forwarding records to `tracing` events
#[derive(Debug, Default)]
pub struct TracingLogger {
    level: LevelFilter,
}

impl TracingLogger {
    /// Create a tracing logger with the given minimum level
    pub const fn new(level: LogLevel) -> Self {
        Self { level: LevelFilter::new(level) }
    }
}

impl Logger for TracingLogger {
    fn write(&self, source: &str, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(source, "{message}"),
            LogLevel::Info => tracing::info!(source, "{message}"),
            LogLevel::Warn => tracing::warn!(source, "{message}"),
            LogLevel::Error | LogLevel::Fatal => tracing::error!(source, %level, "{message}"),
        }
    }

    fn level(&self) -> LogLevel {
        self.level.get()
    }

    fn set_level(&self, level: LogLevel) {
        self.level.set(level);
    }
}

/// Logger printing `[source] [LEVEL  ] -> message` lines to stdout
#[derive(Debug, Default)]
pub struct ConsoleLogger {
    level: LevelFilter,
}

impl ConsoleLogger {
    /// Create a console logger with the given minimum level
    pub const fn new(level: LogLevel) -> Self {
        Self { level: LevelFilter::new(level) }
    }

    /// Render a record the way it is printed
    pub fn format(source: &str, level: LogLevel, message: &str) -> String {
        format!("[{source}] [{:<7}] -> {message}", level.to_string())
    }
}

impl Logger for ConsoleLogger {
    fn write(&self, source: &str, level: LogLevel, message: &str) {
        println!("{}", Self::format(source, level, message));
    }

    fn level(&self) -> LogLevel {
        self.level.get()
    }

    fn set_level(&self, level: LogLevel) {
        self.level.set(level);
    }
}

/// A captured log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Emitting component
    pub source: String,
    /// Severity
    pub level: LogLevel,
    /// Rendered message
    pub message: String,
}

/// Logger keeping every record in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    level: LevelFilter,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Create a memory logger with the given minimum level
    pub fn new(level: LogLevel) -> Self {
        Self { level: LevelFilter::new(level), records: Mutex::default() }
    }

    /// Snapshot of the captured records
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Captured messages only
    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Drop all captured records
    pub fn clear(&self) {
        self.records.lock().clear();
    }
}

impl Logger for MemoryLogger {
    fn write(&self, source: &str, level: LogLevel, message: &str) {
        self.records.lock().push(LogRecord {
            source: source.to_owned(),
            level,
            message: message.to_owned(),
        });
    }

    fn level(&self) -> LogLevel {
        self.level.get()
    }

    fn set_level(&self, level: LogLevel) {
        self.level.set(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_level_is_fatal() {
        let logger = MemoryLogger::default();
        assert_eq!(logger.level(), LogLevel::Fatal);
        logger.log("TEST", LogLevel::Error, "dropped");
        logger.log("TEST", LogLevel::Fatal, "kept");
        assert_eq!(logger.messages(), ["kept"]);
    }

    #[test]
    fn test_level_filter() {
        let logger = MemoryLogger::new(LogLevel::Info);
        logger.log("TEST", LogLevel::Debug, "debug");
        logger.log("TEST", LogLevel::Info, "info");
        logger.log("TEST", LogLevel::Warn, "warn");
        assert_eq!(logger.messages(), ["info", "warn"]);

        logger.set_level(LogLevel::Debug);
        logger.log("TEST", LogLevel::Debug, "debug");
        assert_eq!(logger.records().last().map(|r| r.level), Some(LogLevel::Debug));
    }

    #[test]
    fn test_log_bytes() {
        let logger = MemoryLogger::new(LogLevel::Debug);
        logger.log_bytes("APDU", LogLevel::Info, ">> ", &[0x80, 0x50, 0x0a, 0xff], " ");
        logger.log_bytes("APDU", LogLevel::Info, "", &[0x01, 0x02], ":");
        logger.log_bytes("APDU", LogLevel::Info, "empty", &[], " ");
        assert_eq!(logger.messages(), [">> 80 50 0a ff", "01:02", "empty"]);
        assert_eq!(logger.records()[0].source, "APDU");
    }

    #[test]
    fn test_console_format() {
        assert_eq!(ConsoleLogger::format("T1", LogLevel::Warn, "retry"), "[T1] [WARNING] -> retry");
        assert_eq!(ConsoleLogger::format("T1", LogLevel::Info, "ok"), "[T1] [INFO   ] -> ok");
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::try_from(2).unwrap(), LogLevel::Warn);
        let error = LogLevel::try_from(5).unwrap_err();
        assert_eq!(error.code().decompose(), (0x90, 0x86, 0xfd));
    }

    #[test]
    fn test_log_handle_without_logger() {
        let handle = LogHandle::default();
        handle.log("TEST", LogLevel::Fatal, "nobody listens");
        assert!(handle.get().is_none());
    }
}
