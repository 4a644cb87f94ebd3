//! tunring-core: driver abstraction for tunring.
//!
//! This crate defines what a virtual network adapter driver must provide
//! ([`Driver`]), the values it exchanges ([`Luid`], [`DriverVersion`],
//! [`Guid`], [`RawPacket`]), the error taxonomy ([`TunError`]) and the wait
//! primitive used for receive readiness ([`Event`], with the portable
//! [`Signal`] implementation).
//!
//! It contains no policy. Lifecycle rules, blocking helpers and logging
//! defaults live in the `tunring` crate.

mod driver;
mod error;
mod event;
mod limits;
mod log;
mod signal;
mod types;

pub use driver::{Driver, RawPacket};
pub use error::{TunError, TunResult};
pub use event::{Event, Wakeup};
pub use limits::{
    encode_utf16, validate_packet_size, validate_pool_string, CapacityBounds, MAX_IP_PACKET_SIZE,
    MAX_POOL,
};
pub use log::{filetime_to_system_time, LogLevel, LogRecord, LogSink};
pub use signal::Signal;
pub use types::{DriverVersion, Guid, Luid};
