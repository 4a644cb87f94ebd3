//! Process-wide entry point: owns the driver and hands out adapters.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tunring_core::{Driver, DriverVersion, TunError, TunResult};

use crate::adapter::{Adapter, AdapterConfig};
use crate::logging::Logger;

/// Process-wide configuration, applied once when the manager is built.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    /// Logger installed in the driver at construction.
    pub logger: Logger,
    /// Adapters on an older running driver are closed again and rejected.
    pub min_driver_version: Option<DriverVersion>,
    /// Remove the driver when the manager is dropped with nothing left open.
    pub delete_driver_on_drop: bool,
}

impl ManagerConfig {
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_min_driver_version(mut self, version: DriverVersion) -> Self {
        self.min_driver_version = Some(version);
        self
    }

    pub fn with_delete_driver_on_drop(mut self, delete: bool) -> Self {
        self.delete_driver_on_drop = delete;
        self
    }
}

/// State shared between the manager and every adapter and session it made.
pub(crate) struct Shared<D: Driver> {
    pub(crate) driver: D,
    pub(crate) adapters: AtomicUsize,
    pub(crate) sessions: AtomicUsize,
    /// Lowercased names of adapters with a running session, across every
    /// handle opened on them.
    pub(crate) running: Mutex<HashSet<String>>,
}

/// Owns a driver and enforces the adapter/session lifecycle on top of it.
///
/// ```
/// use tunring::{AdapterConfig, SessionConfig, SessionManager};
/// use tunring_mem::MemDriver;
///
/// let manager = SessionManager::new(MemDriver::new());
/// let adapter = manager.create_adapter(&AdapterConfig::new("doc0")).unwrap();
/// let session = adapter.start_session(&SessionConfig::default()).unwrap();
///
/// session.try_send(&[0x45, 0, 0, 20]).unwrap();
/// assert_eq!(manager.driver().drain_outbound("doc0").len(), 1);
/// ```
pub struct SessionManager<D: Driver> {
    shared: Arc<Shared<D>>,
    min_driver_version: Option<DriverVersion>,
    delete_driver_on_drop: bool,
}

impl<D: Driver> SessionManager<D> {
    /// Manager with the default configuration (driver logs go to `tracing`).
    pub fn new(driver: D) -> Self {
        Self::with_config(driver, ManagerConfig::default())
    }

    pub fn with_config(driver: D, config: ManagerConfig) -> Self {
        driver.set_logger(config.logger.into_sink());
        Self {
            shared: Arc::new(Shared {
                driver,
                adapters: AtomicUsize::new(0),
                sessions: AtomicUsize::new(0),
                running: Mutex::new(HashSet::new()),
            }),
            min_driver_version: config.min_driver_version,
            delete_driver_on_drop: config.delete_driver_on_drop,
        }
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.shared.driver
    }

    /// Replace the driver's logger.
    pub fn set_logger(&self, logger: Logger) {
        tracing::debug!(?logger, "installing driver logger");
        self.shared.driver.set_logger(logger.into_sink());
    }

    pub fn driver_version(&self) -> TunResult<DriverVersion> {
        self.shared.driver.running_driver_version()
    }

    pub fn create_adapter(&self, config: &AdapterConfig) -> TunResult<Adapter<D>> {
        config.validate()?;
        let handle =
            self.shared
                .driver
                .create_adapter(&config.name, &config.tunnel_type, config.guid)?;
        let adapter = Adapter::new(self.shared.clone(), handle, config.name.clone());
        tracing::debug!(name = %config.name, luid = %adapter.luid(), "created adapter");
        self.check_version(adapter)
    }

    pub fn open_adapter(&self, name: &str) -> TunResult<Adapter<D>> {
        tunring_core::validate_pool_string("adapter name", name)?;
        let handle = self.shared.driver.open_adapter(name)?;
        let adapter = Adapter::new(self.shared.clone(), handle, name.to_owned());
        tracing::debug!(name, luid = %adapter.luid(), "opened adapter");
        self.check_version(adapter)
    }

    /// Remove the driver from the system. Refused while any session started
    /// through this manager is running.
    pub fn delete_driver(&self) -> TunResult<()> {
        let sessions = self.active_sessions();
        if sessions > 0 {
            tracing::warn!(sessions, "refusing to delete driver with active sessions");
            return Err(TunError::ContractViolation(
                "driver deleted while sessions are active",
            ));
        }
        self.shared.driver.delete_driver()?;
        tracing::debug!("deleted driver");
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.load(Ordering::Acquire)
    }

    pub fn open_adapters(&self) -> usize {
        self.shared.adapters.load(Ordering::Acquire)
    }

    fn check_version(&self, adapter: Adapter<D>) -> TunResult<Adapter<D>> {
        let Some(min) = self.min_driver_version else {
            return Ok(adapter);
        };
        let running = self.driver_version()?;
        if running < min {
            tracing::warn!(%running, required = %min, "driver too old");
            return Err(TunError::driver(format!(
                "driver version {running} is older than required {min}"
            )));
        }
        Ok(adapter)
    }
}

impl<D: Driver> Drop for SessionManager<D> {
    fn drop(&mut self) {
        if !self.delete_driver_on_drop {
            return;
        }
        if self.active_sessions() > 0 || self.open_adapters() > 0 {
            tracing::debug!("adapters still open, keeping driver");
            return;
        }
        if let Err(e) = self.shared.driver.delete_driver() {
            tracing::warn!(error = %e, "failed to delete driver");
        }
    }
}

impl<D: Driver + std::fmt::Debug> std::fmt::Debug for SessionManager<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("driver", &self.shared.driver)
            .field("adapters", &self.open_adapters())
            .field("sessions", &self.active_sessions())
            .finish()
    }
}
