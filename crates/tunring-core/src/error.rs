//! Error taxonomy shared by every driver and the session manager.

use std::fmt;
use std::io;

/// Result alias used throughout tunring.
pub type TunResult<T> = Result<T, TunError>;

/// Errors surfaced by drivers and the session manager.
///
/// Driver-level failures are never swallowed: every one of them reaches the
/// caller through one of these variants. Diagnostic chatter from the driver
/// goes through the installed logger instead.
#[derive(Debug)]
pub enum TunError {
    /// The driver could not be loaded, is missing an entry point, runs an
    /// unsupported version, or refused the request (e.g. a name collision).
    Driver { message: String },
    /// No adapter with the given name exists.
    NotFound { name: String },
    /// A ring is full or ring memory could not be allocated.
    ResourceExhausted { what: &'static str },
    /// The receive ring is empty. Expected and retried.
    WouldBlock,
    /// The session was shut down or the driver reported end of file.
    SessionEnded,
    /// A blocking helper gave up.
    TimedOut,
    /// The caller's interrupt event fired during a blocking call. The session
    /// stays usable.
    Interrupted,
    /// A caller-supplied value is out of range.
    InvalidArgument(String),
    /// The caller broke the adapter/session lifecycle contract.
    ContractViolation(&'static str),
    /// Any other OS-level failure.
    Io(io::Error),
}

impl TunError {
    pub fn driver(message: impl Into<String>) -> Self {
        TunError::Driver {
            message: message.into(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        TunError::NotFound { name: name.into() }
    }

    /// True for conditions a caller is expected to retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TunError::WouldBlock | TunError::ResourceExhausted { .. }
        )
    }

    /// True once the session can never deliver or accept packets again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TunError::SessionEnded)
    }
}

impl fmt::Display for TunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunError::Driver { message } => write!(f, "driver error: {}", message),
            TunError::NotFound { name } => write!(f, "adapter not found: {}", name),
            TunError::ResourceExhausted { what } => write!(f, "resource exhausted: {}", what),
            TunError::WouldBlock => write!(f, "no packet available"),
            TunError::SessionEnded => write!(f, "session has ended"),
            TunError::TimedOut => write!(f, "operation timed out"),
            TunError::Interrupted => write!(f, "operation interrupted"),
            TunError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            TunError::ContractViolation(msg) => write!(f, "contract violation: {}", msg),
            TunError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for TunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TunError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for TunError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => TunError::WouldBlock,
            io::ErrorKind::TimedOut => TunError::TimedOut,
            io::ErrorKind::Interrupted => TunError::Interrupted,
            io::ErrorKind::NotFound => TunError::NotFound {
                name: e.to_string(),
            },
            _ => TunError::Io(e),
        }
    }
}

impl From<TunError> for io::Error {
    fn from(e: TunError) -> Self {
        match e {
            TunError::Io(e) => e,
            TunError::WouldBlock => io::Error::from(io::ErrorKind::WouldBlock),
            TunError::TimedOut => io::Error::from(io::ErrorKind::TimedOut),
            TunError::Interrupted => io::Error::new(io::ErrorKind::Interrupted, e.to_string()),
            TunError::SessionEnded => io::Error::new(io::ErrorKind::UnexpectedEof, e.to_string()),
            TunError::NotFound { .. } => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            TunError::InvalidArgument(_) => {
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
            }
            other => io::Error::other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            TunError::not_found("wg0").to_string(),
            "adapter not found: wg0"
        );
        assert_eq!(
            TunError::ResourceExhausted { what: "send ring" }.to_string(),
            "resource exhausted: send ring"
        );
        assert!(TunError::driver("boom").to_string().contains("boom"));
    }

    #[test]
    fn test_classification() {
        assert!(TunError::WouldBlock.is_transient());
        assert!(TunError::ResourceExhausted { what: "x" }.is_transient());
        assert!(!TunError::SessionEnded.is_transient());
        assert!(TunError::SessionEnded.is_terminal());
        assert!(!TunError::TimedOut.is_terminal());
        assert!(!TunError::Interrupted.is_terminal());
        assert!(!TunError::Interrupted.is_transient());
    }

    #[test]
    fn test_io_round_trip_kinds() {
        let e: TunError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert!(matches!(e, TunError::WouldBlock));

        let back: io::Error = TunError::SessionEnded.into();
        assert_eq!(back.kind(), io::ErrorKind::UnexpectedEof);

        let back: io::Error = TunError::InvalidArgument("x".into()).into();
        assert_eq!(back.kind(), io::ErrorKind::InvalidInput);

        let back: io::Error = TunError::Interrupted.into();
        assert_eq!(back.kind(), io::ErrorKind::Interrupted);
    }
}
