//! Conformance against the real driver.
//!
//! These need `wintun.dll` on the DLL search path and an elevated process,
//! so they are ignored by default:
//!
//! ```text
//! cargo test -p tunring-wintun -- --ignored --test-threads=1
//! ```

#![cfg(windows)]

use tunring::CapacityBounds;
use tunring_testkit::{DriverFactory, TestError};
use tunring_wintun::Wintun;

struct WintunFactory;

impl DriverFactory for WintunFactory {
    type Driver = Wintun;

    fn create() -> Result<Self::Driver, TestError> {
        Wintun::load_default().map_err(|e| TestError::Setup(format!("{}", e)))
    }

    fn small_capacity() -> u32 {
        CapacityBounds::WINTUN.min
    }

    fn adapter_name(scenario: &str) -> String {
        format!("tunring-it-{}", scenario)
    }
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn empty_receive_would_block() {
    tunring_testkit::run_empty_receive_would_block::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn receive_timeout() {
    tunring_testkit::run_receive_timeout::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn shutdown_unblocks_waiter() {
    tunring_testkit::run_shutdown_unblocks_waiter::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn second_session_rejected() {
    tunring_testkit::run_second_session_rejected::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn second_handle_session_rejected() {
    tunring_testkit::run_second_handle_session_rejected::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn receive_interruptible() {
    tunring_testkit::run_receive_interruptible::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn close_deferred_while_session_active() {
    tunring_testkit::run_close_deferred_while_session_active::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn delete_driver_rejected_with_session() {
    tunring_testkit::run_delete_driver_rejected_with_session::<WintunFactory>();
}

#[test]
#[ignore = "needs wintun.dll and administrator rights"]
fn logger_replacement() {
    tunring_testkit::run_logger_replacement::<WintunFactory>();
}
