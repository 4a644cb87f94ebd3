//! Echo loop over the in-memory driver.
//!
//! A reader thread answers every inbound packet by sending it back, while
//! the async side plays the peer. Run with `RUST_LOG=debug` to see the
//! session lifecycle and the driver's own log lines.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use tunring::{AdapterConfig, ManagerConfig, ReadPump, SessionConfig, SessionManager};
use tunring_mem::MemDriver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let driver = MemDriver::new();
    let manager = SessionManager::with_config(driver.clone(), ManagerConfig::default());
    tracing::info!(version = %manager.driver_version()?, "driver loaded");

    let adapter = manager.create_adapter(&AdapterConfig::new("loop0"))?;
    tracing::info!(luid = %adapter.luid(), "adapter ready");

    let session = Arc::new(adapter.start_session(&SessionConfig::default())?);
    let echo = session.clone();
    let pump = ReadPump::spawn(session.clone(), move |packet| {
        if let Err(e) = echo.send(packet) {
            tracing::warn!(error = %e, "echo failed");
        }
    })?;

    for i in 0..16u8 {
        let packet = [0x45, 0, 0, 20, i];
        while !driver.inject("loop0", &packet) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let mut echoed = 0;
    while echoed < 16 {
        echoed += driver.drain_outbound("loop0").len();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let delivered = pump.stop()?;
    tracing::info!(delivered, stats = ?session.stats(), "done");
    Ok(())
}
