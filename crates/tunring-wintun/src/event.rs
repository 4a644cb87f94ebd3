//! Win32 event objects.

use std::io;
use std::time::Duration;

use tunring_core::{Event, TunError, TunResult, Wakeup};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, WAIT_FAILED, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows_sys::Win32::System::Threading::{
    CreateEventW, ResetEvent, SetEvent, WaitForMultipleObjects, WaitForSingleObject, INFINITE,
};

/// An event `HANDLE`.
///
/// Events made with [`Event::new_manual_reset`] are owned and closed on
/// drop. The session read event belongs to the driver and is only borrowed.
#[derive(Debug)]
pub struct WinEvent {
    handle: HANDLE,
    owned: bool,
}

impl WinEvent {
    pub(crate) fn borrowed(handle: HANDLE) -> Self {
        Self {
            handle,
            owned: false,
        }
    }

    pub fn raw(&self) -> HANDLE {
        self.handle
    }
}

fn timeout_ms(timeout: Option<Duration>) -> u32 {
    match timeout {
        // INFINITE is u32::MAX, so finite waits stop one short of it.
        Some(t) => t.as_millis().min((INFINITE - 1) as u128) as u32,
        None => INFINITE,
    }
}

impl Event for WinEvent {
    fn new_manual_reset() -> TunResult<Self> {
        let handle = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
        if handle == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Self {
            handle,
            owned: true,
        })
    }

    fn set(&self) -> TunResult<()> {
        if unsafe { SetEvent(self.handle) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn reset(&self) -> TunResult<()> {
        if unsafe { ResetEvent(self.handle) } == 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn is_set(&self) -> bool {
        unsafe { WaitForSingleObject(self.handle, 0) == WAIT_OBJECT_0 }
    }

    fn wait_either(&self, cancel: &Self, timeout: Option<Duration>) -> TunResult<Wakeup> {
        // With both signalled the lowest index is reported, so cancel goes first.
        wait_any(
            &[cancel.handle, self.handle],
            &[Wakeup::Cancelled, Wakeup::Ready],
            timeout,
        )
    }

    fn wait_interruptible(
        &self,
        cancel: &Self,
        interrupt: &Self,
        timeout: Option<Duration>,
    ) -> TunResult<Wakeup> {
        wait_any(
            &[cancel.handle, interrupt.handle, self.handle],
            &[Wakeup::Cancelled, Wakeup::Interrupted, Wakeup::Ready],
            timeout,
        )
    }
}

/// `WaitForMultipleObjects` over `handles`, reporting `outcomes[i]` when
/// handle `i` is the lowest signalled one.
fn wait_any(handles: &[HANDLE], outcomes: &[Wakeup], timeout: Option<Duration>) -> TunResult<Wakeup> {
    let result = unsafe {
        WaitForMultipleObjects(handles.len() as u32, handles.as_ptr(), 0, timeout_ms(timeout))
    };
    match result {
        WAIT_TIMEOUT => Ok(Wakeup::TimedOut),
        WAIT_FAILED => Err(io::Error::last_os_error().into()),
        r => r
            .checked_sub(WAIT_OBJECT_0)
            .and_then(|i| outcomes.get(i as usize).copied())
            .ok_or_else(|| TunError::driver(format!("unexpected wait result {r:#x}"))),
    }
}

impl Drop for WinEvent {
    fn drop(&mut self) {
        if self.owned {
            unsafe { CloseHandle(self.handle) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_wins() {
        let ready = WinEvent::new_manual_reset().unwrap();
        let cancel = WinEvent::new_manual_reset().unwrap();

        assert_eq!(
            ready.wait_either(&cancel, Some(Duration::ZERO)).unwrap(),
            Wakeup::TimedOut
        );
        ready.set().unwrap();
        assert_eq!(ready.wait_either(&cancel, None).unwrap(), Wakeup::Ready);
        cancel.set().unwrap();
        assert_eq!(ready.wait_either(&cancel, None).unwrap(), Wakeup::Cancelled);

        ready.reset().unwrap();
        assert!(!ready.is_set());
    }

    #[test]
    fn test_interrupt_ordering() {
        let ready = WinEvent::new_manual_reset().unwrap();
        let cancel = WinEvent::new_manual_reset().unwrap();
        let interrupt = WinEvent::new_manual_reset().unwrap();

        assert_eq!(
            ready
                .wait_interruptible(&cancel, &interrupt, Some(Duration::ZERO))
                .unwrap(),
            Wakeup::TimedOut
        );
        ready.set().unwrap();
        interrupt.set().unwrap();
        assert_eq!(
            ready.wait_interruptible(&cancel, &interrupt, None).unwrap(),
            Wakeup::Interrupted
        );
        cancel.set().unwrap();
        assert_eq!(
            ready.wait_interruptible(&cancel, &interrupt, None).unwrap(),
            Wakeup::Cancelled
        );
    }
}
