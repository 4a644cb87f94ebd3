//! `GetLastError` translation.

use std::io;

use tunring_core::TunError;
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_BUFFER_OVERFLOW, ERROR_FILE_NOT_FOUND, ERROR_HANDLE_EOF,
    ERROR_INVALID_DATA, ERROR_NOT_ENOUGH_MEMORY, ERROR_NO_MORE_ITEMS, ERROR_OUTOFMEMORY,
};

/// Error for a failed call, read from the thread's last-error code.
pub(crate) fn last_error(op: &'static str) -> TunError {
    from_code(unsafe { GetLastError() }, op)
}

pub(crate) fn from_code(code: u32, op: &'static str) -> TunError {
    match code {
        ERROR_NO_MORE_ITEMS => TunError::WouldBlock,
        ERROR_HANDLE_EOF => TunError::SessionEnded,
        ERROR_BUFFER_OVERFLOW => TunError::ResourceExhausted { what: "send ring" },
        ERROR_NOT_ENOUGH_MEMORY | ERROR_OUTOFMEMORY => TunError::ResourceExhausted {
            what: "ring memory",
        },
        ERROR_INVALID_DATA => TunError::driver(format!("{op}: ring corrupt")),
        _ => TunError::Io(io::Error::from_raw_os_error(code as i32)),
    }
}

/// Failure of CreateAdapter. Name collisions and install failures alike are
/// driver errors.
pub(crate) fn create_error(name: &str) -> TunError {
    let code = unsafe { GetLastError() };
    TunError::driver(format!(
        "create adapter {name}: {}",
        io::Error::from_raw_os_error(code as i32)
    ))
}

/// Failure of OpenAdapter.
pub(crate) fn open_error(name: &str) -> TunError {
    let code = unsafe { GetLastError() };
    if code == ERROR_FILE_NOT_FOUND {
        return TunError::not_found(name);
    }
    TunError::driver(format!(
        "open adapter {name}: {}",
        io::Error::from_raw_os_error(code as i32)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert!(matches!(
            from_code(ERROR_NO_MORE_ITEMS, "receive"),
            TunError::WouldBlock
        ));
        assert!(matches!(
            from_code(ERROR_HANDLE_EOF, "receive"),
            TunError::SessionEnded
        ));
        assert!(matches!(
            from_code(ERROR_BUFFER_OVERFLOW, "allocate"),
            TunError::ResourceExhausted { .. }
        ));
        assert!(matches!(
            from_code(ERROR_INVALID_DATA, "receive"),
            TunError::Driver { .. }
        ));
        assert!(matches!(from_code(5, "start"), TunError::Io(_)));
    }
}
