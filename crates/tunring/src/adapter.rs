//! Adapter handles and their configuration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tunring_core::{Driver, Guid, Luid, TunError, TunResult};

use crate::manager::Shared;
use crate::session::{Session, SessionConfig};

/// Tunnel type used when none is given.
pub const DEFAULT_TUNNEL_TYPE: &str = "tunring";

/// Parameters for creating an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub name: String,
    pub tunnel_type: String,
    /// GUID to request from the driver. `None` lets it pick one.
    pub guid: Option<Guid>,
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tunnel_type: DEFAULT_TUNNEL_TYPE.to_owned(),
            guid: None,
        }
    }

    pub fn with_tunnel_type(mut self, tunnel_type: impl Into<String>) -> Self {
        self.tunnel_type = tunnel_type.into();
        self
    }

    pub fn with_guid(mut self, guid: Guid) -> Self {
        self.guid = Some(guid);
        self
    }

    pub fn validate(&self) -> TunResult<()> {
        tunring_core::validate_pool_string("adapter name", &self.name)?;
        tunring_core::validate_pool_string("tunnel type", &self.tunnel_type)
    }
}

pub(crate) struct AdapterInner<D: Driver> {
    pub(crate) shared: Arc<Shared<D>>,
    pub(crate) handle: D::Adapter,
    pub(crate) name: String,
    pub(crate) session_active: AtomicBool,
}

impl<D: Driver> AdapterInner<D> {
    /// Take the adapter's single session slot. A second handle opened on
    /// the same adapter shares it.
    pub(crate) fn claim_session(&self) -> TunResult<()> {
        const BUSY: TunError = TunError::ContractViolation("adapter already has an active session");

        if self
            .session_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BUSY);
        }
        if !self.shared.running.lock().insert(self.device_key()) {
            self.session_active.store(false, Ordering::Release);
            tracing::warn!(name = %self.name, "session already running on another handle");
            return Err(BUSY);
        }
        Ok(())
    }

    pub(crate) fn release_session(&self) {
        self.shared.running.lock().remove(&self.device_key());
        self.session_active.store(false, Ordering::Release);
    }

    fn device_key(&self) -> String {
        self.name.to_ascii_lowercase()
    }
}

impl<D: Driver> Drop for AdapterInner<D> {
    fn drop(&mut self) {
        // SAFETY: the last reference is gone, and sessions hold one, so no
        // session is running and the handle is never used again.
        unsafe { self.shared.driver.close_adapter(self.handle) };
        self.shared.adapters.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!(name = %self.name, "closed adapter");
    }
}

/// An open virtual network adapter.
///
/// Closing happens on [`close`](Self::close) or drop. A running session
/// keeps the driver-level adapter alive, so the driver always sees the
/// session end before the adapter closes.
pub struct Adapter<D: Driver> {
    inner: Arc<AdapterInner<D>>,
}

impl<D: Driver> Adapter<D> {
    pub(crate) fn new(shared: Arc<Shared<D>>, handle: D::Adapter, name: String) -> Self {
        shared.adapters.fetch_add(1, Ordering::AcqRel);
        Self {
            inner: Arc::new(AdapterInner {
                shared,
                handle,
                name,
                session_active: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn luid(&self) -> Luid {
        self.inner.shared.driver.adapter_luid(self.inner.handle)
    }

    /// Raw driver handle, for driver-specific calls.
    pub fn raw_handle(&self) -> D::Adapter {
        self.inner.handle
    }

    pub fn has_active_session(&self) -> bool {
        self.inner.session_active.load(Ordering::Acquire)
    }

    /// Start the adapter's packet session. Only one may run at a time.
    pub fn start_session(&self, config: &SessionConfig) -> TunResult<Session<D>> {
        Session::start(self.inner.clone(), config.clone())
    }

    /// Close the adapter.
    ///
    /// With a session still running this returns `ContractViolation`; the
    /// handle is released anyway and the driver-level close happens when
    /// the session ends.
    pub fn close(self) -> TunResult<()> {
        if self.has_active_session() {
            tracing::warn!(name = %self.inner.name, "adapter closed with an active session");
            return Err(TunError::ContractViolation(
                "adapter closed while a session is active",
            ));
        }
        Ok(())
    }
}

impl<D: Driver> std::fmt::Debug for Adapter<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("name", &self.inner.name)
            .field("handle", &self.inner.handle)
            .field("session_active", &self.has_active_session())
            .finish()
    }
}
