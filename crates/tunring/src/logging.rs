//! Where driver log records go.

use std::fmt;
use std::sync::Arc;

use tunring_core::{LogLevel, LogRecord, LogSink};

/// Target used for records forwarded by [`Logger::Tracing`].
pub const DRIVER_LOG_TARGET: &str = "tunring::driver";

/// Destination for the driver's diagnostic messages.
///
/// The driver keeps one logger per process, so installing a new one replaces
/// whatever was there before.
#[derive(Clone, Default)]
pub enum Logger {
    /// Forward to `tracing` under the `tunring::driver` target.
    #[default]
    Tracing,
    /// Call a user-supplied sink. It may run on any driver thread.
    Custom(LogSink),
    /// Drop all driver messages.
    Disabled,
}

impl Logger {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        Logger::Custom(Arc::new(f))
    }

    pub(crate) fn into_sink(self) -> Option<LogSink> {
        match self {
            Logger::Tracing => Some(Arc::new(forward_to_tracing)),
            Logger::Custom(sink) => Some(sink),
            Logger::Disabled => None,
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Logger::Tracing => "Logger::Tracing",
            Logger::Custom(_) => "Logger::Custom(..)",
            Logger::Disabled => "Logger::Disabled",
        })
    }
}

fn forward_to_tracing(record: &LogRecord) {
    match record.level {
        LogLevel::Info => tracing::info!(target: DRIVER_LOG_TARGET, "{}", record.message),
        LogLevel::Warn => tracing::warn!(target: DRIVER_LOG_TARGET, "{}", record.message),
        LogLevel::Error => tracing::error!(target: DRIVER_LOG_TARGET, "{}", record.message),
    }
}
