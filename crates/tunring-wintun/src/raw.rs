//! Typed slots for the Wintun exports.
//!
//! Signatures follow `wintun.h`. Calling convention is `system` (`WINAPI`).

use windows_sys::core::{GUID, PCWSTR};
use windows_sys::Win32::Foundation::{BOOL, HANDLE};
use windows_sys::Win32::NetworkManagement::Ndis::NET_LUID_LH;

/// Opaque adapter object behind `WINTUN_ADAPTER_HANDLE`.
#[repr(C)]
pub struct WintunAdapter {
    _private: [u8; 0],
}

/// Opaque session object behind `WINTUN_SESSION_HANDLE`.
#[repr(C)]
pub struct WintunSession {
    _private: [u8; 0],
}

pub type AdapterHandle = *mut WintunAdapter;
pub type SessionHandle = *mut WintunSession;

/// `WINTUN_LOGGER_LEVEL`.
pub type LoggerLevel = i32;
pub const WINTUN_LOG_INFO: LoggerLevel = 0;
pub const WINTUN_LOG_WARN: LoggerLevel = 1;
pub const WINTUN_LOG_ERR: LoggerLevel = 2;

/// `WINTUN_LOGGER_CALLBACK`. The timestamp is in 100ns intervals since
/// 1601-01-01 UTC.
pub type LoggerCallback =
    Option<unsafe extern "system" fn(level: LoggerLevel, timestamp: u64, message: PCWSTR)>;

pub type CreateAdapterFn = unsafe extern "system" fn(
    name: PCWSTR,
    tunnel_type: PCWSTR,
    requested_guid: *const GUID,
) -> AdapterHandle;
pub type OpenAdapterFn = unsafe extern "system" fn(name: PCWSTR) -> AdapterHandle;
pub type CloseAdapterFn = unsafe extern "system" fn(adapter: AdapterHandle);
pub type DeleteDriverFn = unsafe extern "system" fn() -> BOOL;
pub type GetAdapterLuidFn = unsafe extern "system" fn(adapter: AdapterHandle, luid: *mut NET_LUID_LH);
pub type GetRunningDriverVersionFn = unsafe extern "system" fn() -> u32;
pub type SetLoggerFn = unsafe extern "system" fn(new_logger: LoggerCallback);
pub type StartSessionFn =
    unsafe extern "system" fn(adapter: AdapterHandle, capacity: u32) -> SessionHandle;
pub type EndSessionFn = unsafe extern "system" fn(session: SessionHandle);
pub type GetReadWaitEventFn = unsafe extern "system" fn(session: SessionHandle) -> HANDLE;
pub type ReceivePacketFn =
    unsafe extern "system" fn(session: SessionHandle, packet_size: *mut u32) -> *mut u8;
pub type ReleaseReceivePacketFn = unsafe extern "system" fn(session: SessionHandle, packet: *const u8);
pub type AllocateSendPacketFn =
    unsafe extern "system" fn(session: SessionHandle, packet_size: u32) -> *mut u8;
pub type SendPacketFn = unsafe extern "system" fn(session: SessionHandle, packet: *const u8);

/// The fourteen resolved entry points.
#[derive(Clone, Copy)]
pub struct FunctionTable {
    pub create_adapter: CreateAdapterFn,
    pub open_adapter: OpenAdapterFn,
    pub close_adapter: CloseAdapterFn,
    pub delete_driver: DeleteDriverFn,
    pub get_adapter_luid: GetAdapterLuidFn,
    pub get_running_driver_version: GetRunningDriverVersionFn,
    pub set_logger: SetLoggerFn,
    pub start_session: StartSessionFn,
    pub end_session: EndSessionFn,
    pub get_read_wait_event: GetReadWaitEventFn,
    pub receive_packet: ReceivePacketFn,
    pub release_receive_packet: ReleaseReceivePacketFn,
    pub allocate_send_packet: AllocateSendPacketFn,
    pub send_packet: SendPacketFn,
}
