//! The loaded DLL and its `Driver` implementation.

use std::ffi::OsStr;
use std::ptr::NonNull;

use libloading::Library;
use tunring_core::{
    CapacityBounds, Driver, DriverVersion, Guid, LogSink, Luid, RawPacket, TunError, TunResult,
};
use widestring::U16CString;
use windows_sys::core::GUID;
use windows_sys::Win32::Foundation::{GetLastError, ERROR_FILE_NOT_FOUND};
use windows_sys::Win32::NetworkManagement::Ndis::NET_LUID_LH;

use crate::error;
use crate::event::WinEvent;
use crate::logger;
use crate::raw::{self, FunctionTable};

/// File name searched by [`Wintun::load_default`].
pub const DEFAULT_DLL: &str = "wintun.dll";

/// `WINTUN_ADAPTER_HANDLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WintunAdapterHandle(NonNull<raw::WintunAdapter>);

/// `WINTUN_SESSION_HANDLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WintunSessionHandle(NonNull<raw::WintunSession>);

// SAFETY: Wintun handles are usable from any thread; the driver locks
// internally.
unsafe impl Send for WintunAdapterHandle {}
unsafe impl Sync for WintunAdapterHandle {}
unsafe impl Send for WintunSessionHandle {}
unsafe impl Sync for WintunSessionHandle {}

/// A loaded `wintun.dll`.
pub struct Wintun {
    table: FunctionTable,
    // Keeps the function pointers in `table` valid.
    _library: Library,
}

/// Look up `symbol` as a `T`.
///
/// # Safety
///
/// `T` must be the function pointer type the export was declared with.
unsafe fn resolve<T: Copy>(library: &Library, symbol: &str) -> TunResult<T> {
    let name = format!("{symbol}\0");
    let found = unsafe { library.get::<T>(name.as_bytes()) }
        .map_err(|e| TunError::driver(format!("missing entry point {symbol}: {e}")))?;
    Ok(*found)
}

impl Wintun {
    /// Load the DLL at `path` and resolve every entry point.
    pub fn load(path: impl AsRef<OsStr>) -> TunResult<Self> {
        let path = path.as_ref();
        // SAFETY: loading runs the DLL's initializers; wintun.dll has none
        // with preconditions.
        let library = unsafe { Library::new(path) }.map_err(|e| {
            TunError::driver(format!("failed to load {}: {}", path.to_string_lossy(), e))
        })?;

        // SAFETY: every slot type matches the export's declaration in wintun.h.
        let table = unsafe {
            FunctionTable {
                create_adapter: resolve(&library, "WintunCreateAdapter")?,
                open_adapter: resolve(&library, "WintunOpenAdapter")?,
                close_adapter: resolve(&library, "WintunCloseAdapter")?,
                delete_driver: resolve(&library, "WintunDeleteDriver")?,
                get_adapter_luid: resolve(&library, "WintunGetAdapterLUID")?,
                get_running_driver_version: resolve(&library, "WintunGetRunningDriverVersion")?,
                set_logger: resolve(&library, "WintunSetLogger")?,
                start_session: resolve(&library, "WintunStartSession")?,
                end_session: resolve(&library, "WintunEndSession")?,
                get_read_wait_event: resolve(&library, "WintunGetReadWaitEvent")?,
                receive_packet: resolve(&library, "WintunReceivePacket")?,
                release_receive_packet: resolve(&library, "WintunReleaseReceivePacket")?,
                allocate_send_packet: resolve(&library, "WintunAllocateSendPacket")?,
                send_packet: resolve(&library, "WintunSendPacket")?,
            }
        };

        tracing::debug!(path = %path.to_string_lossy(), "loaded wintun");
        Ok(Self {
            table,
            _library: library,
        })
    }

    /// Load [`DEFAULT_DLL`] from the standard DLL search path.
    pub fn load_default() -> TunResult<Self> {
        Self::load(DEFAULT_DLL)
    }
}

fn wide(what: &str, value: &str) -> TunResult<U16CString> {
    tunring_core::validate_pool_string(what, value)?;
    U16CString::from_str(value).map_err(|e| TunError::InvalidArgument(format!("{what}: {e}")))
}

impl Driver for Wintun {
    type Adapter = WintunAdapterHandle;
    type Session = WintunSessionHandle;
    type Event = WinEvent;

    fn capacity_bounds(&self) -> CapacityBounds {
        CapacityBounds::WINTUN
    }

    fn create_adapter(
        &self,
        name: &str,
        tunnel_type: &str,
        requested_guid: Option<Guid>,
    ) -> TunResult<WintunAdapterHandle> {
        let wide_name = wide("adapter name", name)?;
        let wide_type = wide("tunnel type", tunnel_type)?;
        let guid = requested_guid.map(|g| GUID::from_u128(g.as_u128()));
        let guid_ptr = guid
            .as_ref()
            .map_or(std::ptr::null(), |g| g as *const GUID);

        let handle = unsafe {
            (self.table.create_adapter)(wide_name.as_ptr(), wide_type.as_ptr(), guid_ptr)
        };
        NonNull::new(handle)
            .map(WintunAdapterHandle)
            .ok_or_else(|| error::create_error(name))
    }

    fn open_adapter(&self, name: &str) -> TunResult<WintunAdapterHandle> {
        let wide_name = wide("adapter name", name)?;
        let handle = unsafe { (self.table.open_adapter)(wide_name.as_ptr()) };
        NonNull::new(handle)
            .map(WintunAdapterHandle)
            .ok_or_else(|| error::open_error(name))
    }

    unsafe fn close_adapter(&self, adapter: WintunAdapterHandle) {
        unsafe { (self.table.close_adapter)(adapter.0.as_ptr()) }
    }

    fn adapter_luid(&self, adapter: WintunAdapterHandle) -> Luid {
        let mut luid: NET_LUID_LH = unsafe { std::mem::zeroed() };
        unsafe {
            (self.table.get_adapter_luid)(adapter.0.as_ptr(), &mut luid);
            Luid::from_raw(luid.Value)
        }
    }

    fn running_driver_version(&self) -> TunResult<DriverVersion> {
        let raw = unsafe { (self.table.get_running_driver_version)() };
        if raw == 0 {
            let code = unsafe { GetLastError() };
            if code == ERROR_FILE_NOT_FOUND {
                return Err(TunError::driver("driver is not loaded"));
            }
            return Err(error::from_code(code, "get driver version"));
        }
        Ok(DriverVersion::from_raw(raw))
    }

    fn delete_driver(&self) -> TunResult<()> {
        if unsafe { (self.table.delete_driver)() } == 0 {
            let e = error::last_error("delete driver");
            return Err(TunError::driver(format!("delete driver: {e}")));
        }
        Ok(())
    }

    fn set_logger(&self, sink: Option<LogSink>) {
        let callback = logger::install(sink);
        unsafe { (self.table.set_logger)(callback) };
    }

    fn start_session(
        &self,
        adapter: WintunAdapterHandle,
        capacity: u32,
    ) -> TunResult<WintunSessionHandle> {
        let capacity = CapacityBounds::WINTUN.validate(capacity)?;
        let handle = unsafe { (self.table.start_session)(adapter.0.as_ptr(), capacity) };
        NonNull::new(handle)
            .map(WintunSessionHandle)
            .ok_or_else(|| error::last_error("start session"))
    }

    unsafe fn end_session(&self, session: WintunSessionHandle) {
        unsafe { (self.table.end_session)(session.0.as_ptr()) }
    }

    fn read_wait_event(&self, session: WintunSessionHandle) -> TunResult<WinEvent> {
        let handle = unsafe { (self.table.get_read_wait_event)(session.0.as_ptr()) };
        if handle == 0 {
            return Err(error::last_error("get read wait event"));
        }
        Ok(WinEvent::borrowed(handle))
    }

    fn receive_packet(&self, session: WintunSessionHandle) -> TunResult<RawPacket> {
        let mut size = 0u32;
        let ptr = unsafe { (self.table.receive_packet)(session.0.as_ptr(), &mut size) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(RawPacket::new(ptr, size)),
            None => Err(error::last_error("receive packet")),
        }
    }

    unsafe fn release_receive_packet(&self, session: WintunSessionHandle, packet: RawPacket) {
        unsafe { (self.table.release_receive_packet)(session.0.as_ptr(), packet.as_ptr()) }
    }

    fn allocate_send_packet(&self, session: WintunSessionHandle, size: u32) -> TunResult<RawPacket> {
        let size = tunring_core::validate_packet_size(size as usize)?;
        let ptr = unsafe { (self.table.allocate_send_packet)(session.0.as_ptr(), size) };
        match NonNull::new(ptr) {
            Some(ptr) => Ok(RawPacket::new(ptr, size)),
            None => Err(error::last_error("allocate send packet")),
        }
    }

    unsafe fn send_packet(&self, session: WintunSessionHandle, packet: RawPacket) {
        unsafe { (self.table.send_packet)(session.0.as_ptr(), packet.as_ptr()) }
    }
}

impl std::fmt::Debug for Wintun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wintun").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_dll_is_driver_error() {
        let err = Wintun::load("definitely-not-wintun.dll").unwrap_err();
        assert!(matches!(err, TunError::Driver { .. }));
    }

    #[test]
    fn test_wide_rejects_bad_names() {
        assert!(wide("adapter name", "").is_err());
        assert!(wide("adapter name", "ok").is_ok());
    }
}
