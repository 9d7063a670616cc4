// Fence plus the OS event used to block on it

use std::time::Duration;

use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D12::ID3D12Fence;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use super::api_error;
use crate::backend::{BackendError, Fence, WaitStatus};

pub struct D3d12Fence {
    pub(crate) fence: ID3D12Fence,
    event: HANDLE,
}

impl D3d12Fence {
    pub(crate) fn new(fence: ID3D12Fence) -> Result<Self, BackendError> {
        // Auto-reset, initially unsignaled
        let event = unsafe { CreateEventA(None, false, false, None) }
            .map_err(|e| BackendError::creation("fence event", e))?;
        Ok(Self { fence, event })
    }
}

impl Fence for D3d12Fence {
    fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_value(&self, value: u64, timeout: Option<Duration>) -> Result<WaitStatus, BackendError> {
        if self.completed_value() >= value {
            return Ok(WaitStatus::Reached);
        }

        unsafe { self.fence.SetEventOnCompletion(value, self.event) }
            .map_err(api_error("SetEventOnCompletion"))?;

        let millis = match timeout {
            Some(timeout) => u32::try_from(timeout.as_millis()).unwrap_or(INFINITE - 1),
            None => INFINITE,
        };

        let result = unsafe { WaitForSingleObject(self.event, millis) };
        if result == WAIT_OBJECT_0 {
            Ok(WaitStatus::Reached)
        } else if result == WAIT_TIMEOUT {
            Ok(WaitStatus::TimedOut)
        } else {
            Err(BackendError::api("WaitForSingleObject", format!("{:?}", result)))
        }
    }
}

impl Drop for D3d12Fence {
    fn drop(&mut self) {
        if !self.event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.event);
            }
        }
    }
}
