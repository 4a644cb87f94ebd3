//! Bridge from Wintun's C logger callback to a [`LogSink`].
//!
//! `WintunSetLogger` takes a bare function pointer with no context
//! argument, so the sink has to live in a process-wide slot. This is the
//! only global in tunring.

use std::panic::{self, AssertUnwindSafe};

use parking_lot::RwLock;
use tunring_core::{filetime_to_system_time, LogLevel, LogRecord, LogSink};
use widestring::U16CStr;
use windows_sys::core::PCWSTR;

use crate::raw;

static SINK: RwLock<Option<LogSink>> = RwLock::new(None);

/// Store `sink` and return the callback to hand to the driver.
pub(crate) fn install(sink: Option<LogSink>) -> raw::LoggerCallback {
    let enabled = sink.is_some();
    *SINK.write() = sink;
    if enabled {
        Some(trampoline)
    } else {
        None
    }
}

fn level(level: raw::LoggerLevel) -> LogLevel {
    match level {
        raw::WINTUN_LOG_INFO => LogLevel::Info,
        raw::WINTUN_LOG_WARN => LogLevel::Warn,
        _ => LogLevel::Error,
    }
}

unsafe extern "system" fn trampoline(level_raw: raw::LoggerLevel, timestamp: u64, message: PCWSTR) {
    if message.is_null() {
        return;
    }
    // SAFETY: the driver passes a NUL-terminated string valid for the call.
    let text = unsafe { U16CStr::from_ptr_str(message) }.to_string_lossy();
    let record = LogRecord {
        level: level(level_raw),
        timestamp: filetime_to_system_time(timestamp),
        message: text,
    };

    // Unwinding into the driver is undefined behavior.
    let _ = panic::catch_unwind(AssertUnwindSafe(|| {
        let sink = SINK.read().clone();
        if let Some(sink) = sink {
            sink(&record);
        }
    }));
}
