//! Wintun binding for tunring.
//!
//! [`Wintun::load`] opens `wintun.dll`, resolves its fourteen exports and
//! implements [`tunring_core::Driver`] over them, so a
//! `tunring::SessionManager<Wintun>` drives real adapters.
//!
//! The DLL's ring protocol is opaque here: every packet operation is a
//! straight call into the driver, with null returns translated through
//! `GetLastError`.
//!
//! Creating adapters needs administrator rights. On non-Windows targets
//! this crate is empty.

#![cfg(windows)]

mod error;
mod event;
mod library;
mod logger;
pub mod raw;

pub use event::WinEvent;
pub use library::{Wintun, WintunAdapterHandle, WintunSessionHandle, DEFAULT_DLL};
