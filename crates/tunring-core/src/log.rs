//! Driver log records and the sink type drivers forward them to.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Severity attached to a driver log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        })
    }
}

/// One diagnostic message emitted by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: LogLevel,
    pub timestamp: SystemTime,
    pub message: String,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: SystemTime::now(),
            message: message.into(),
        }
    }
}

/// Callback receiving driver log records.
///
/// Drivers may invoke it from any of their internal threads.
pub type LogSink = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// 100ns intervals between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;

/// Convert a Windows FILETIME-style timestamp (100ns ticks since 1601) to
/// `SystemTime`. Times before the Unix epoch clamp to it.
pub fn filetime_to_system_time(ticks: u64) -> SystemTime {
    let since_unix = ticks.saturating_sub(FILETIME_UNIX_EPOCH);
    UNIX_EPOCH
        + Duration::from_secs(since_unix / 10_000_000)
        + Duration::from_nanos((since_unix % 10_000_000) * 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filetime_conversion() {
        assert_eq!(filetime_to_system_time(FILETIME_UNIX_EPOCH), UNIX_EPOCH);
        assert_eq!(filetime_to_system_time(0), UNIX_EPOCH);

        let one_and_a_bit = FILETIME_UNIX_EPOCH + 10_000_000 + 5;
        assert_eq!(
            filetime_to_system_time(one_and_a_bit),
            UNIX_EPOCH + Duration::from_secs(1) + Duration::from_nanos(500)
        );
    }

    #[test]
    fn test_level_order() {
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
