//! tunring: session manager for virtual network adapter drivers.
//!
//! A [`SessionManager`] owns a [`Driver`] and hands out [`Adapter`]s. An
//! adapter runs at most one [`Session`], a pair of packet rings shared with
//! the driver. Packets are borrowed straight out of the rings:
//!
//! - [`ReceivedPacket`] derefs to the inbound bytes and returns its slot on
//!   drop.
//! - [`SendPacket`] is filled in place and committed with
//!   [`SendPacket::send`].
//!
//! Ownership rules out most lifecycle mistakes (double close, use after
//! end, a packet outliving its session). The rest, such as closing an
//! adapter whose session is still running, come back as
//! [`TunError::ContractViolation`].
//!
//! # Blocking and async use
//!
//! [`Session::receive`] spins briefly and then blocks on the driver's read
//! event. [`Session::shutdown`] wakes every blocked receiver with
//! [`TunError::SessionEnded`]. [`ReadPump`] runs a dedicated reader thread,
//! and [`AsyncSession`] (feature `tokio`, on by default) adapts a session to
//! async code.
//!
//! # Example
//!
//! ```
//! use tunring::{AdapterConfig, SessionConfig, SessionManager};
//! use tunring_mem::MemDriver;
//!
//! let driver = MemDriver::new();
//! let manager = SessionManager::new(driver.clone());
//!
//! let adapter = manager.create_adapter(&AdapterConfig::new("tun0")).unwrap();
//! let session = adapter.start_session(&SessionConfig::default()).unwrap();
//!
//! driver.inject("tun0", &[0x45, 0, 0, 20]);
//! let packet = session.try_receive().unwrap();
//! assert_eq!(packet[0] >> 4, 4);
//! ```

mod adapter;
#[cfg(feature = "tokio")]
mod async_session;
mod logging;
mod manager;
mod packet;
mod reader;
mod session;
mod stats;

pub use adapter::{Adapter, AdapterConfig, DEFAULT_TUNNEL_TYPE};
#[cfg(feature = "tokio")]
pub use async_session::AsyncSession;
pub use logging::{Logger, DRIVER_LOG_TARGET};
pub use manager::{ManagerConfig, SessionManager};
pub use packet::{ReceivedPacket, SendPacket};
pub use reader::ReadPump;
pub use session::{Session, SessionConfig};
pub use stats::SessionStats;

pub use tunring_core::*;
