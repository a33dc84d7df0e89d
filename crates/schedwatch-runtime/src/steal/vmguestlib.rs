//! VMware vSphere Guest SDK binding.
//!
//! Links against `libvmGuestLib`. Opening the handle fails when the process
//! is not running inside a VMware virtual machine or the guest service is
//! not available.

use super::{GuestIntrospection, GuestLibError};
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use tracing::debug;

type VmGuestLibHandle = *mut c_void;
type VmGuestLibErrorCode = c_int;

const VMGUESTLIB_ERROR_SUCCESS: VmGuestLibErrorCode = 0;

#[link(name = "vmGuestLib")]
extern "C" {
    fn VMGuestLib_OpenHandle(handle: *mut VmGuestLibHandle) -> VmGuestLibErrorCode;
    fn VMGuestLib_CloseHandle(handle: VmGuestLibHandle) -> VmGuestLibErrorCode;
    fn VMGuestLib_UpdateInfo(handle: VmGuestLibHandle) -> VmGuestLibErrorCode;
    fn VMGuestLib_GetCpuStolenMs(handle: VmGuestLibHandle, value: *mut u64) -> VmGuestLibErrorCode;
    fn VMGuestLib_GetCpuUsedMs(handle: VmGuestLibHandle, value: *mut u64) -> VmGuestLibErrorCode;
    fn VMGuestLib_GetElapsedMs(handle: VmGuestLibHandle, value: *mut u64) -> VmGuestLibErrorCode;
    fn VMGuestLib_GetErrorText(error: VmGuestLibErrorCode) -> *const c_char;
}

fn check(code: VmGuestLibErrorCode) -> Result<(), GuestLibError> {
    if code == VMGUESTLIB_ERROR_SUCCESS {
        return Ok(());
    }

    // SAFETY: the SDK returns a pointer to a static NUL-terminated string
    let text = unsafe {
        let ptr = VMGuestLib_GetErrorText(code);
        if ptr.is_null() {
            String::from("unknown guest library error")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    };
    Err(GuestLibError::new(code, text))
}

/// Open guest library handle.
#[derive(Debug)]
pub struct VmGuestLib {
    handle: VmGuestLibHandle,
}

impl VmGuestLib {
    /// Open a handle to the guest library.
    ///
    /// # Errors
    ///
    /// Returns an error if the process is not a VMware guest or the guest
    /// service is unavailable.
    pub fn open() -> Result<Self, GuestLibError> {
        let mut handle: VmGuestLibHandle = std::ptr::null_mut();
        // SAFETY: `handle` is a valid out-pointer for the duration of the call
        check(unsafe { VMGuestLib_OpenHandle(&mut handle) })?;
        Ok(Self { handle })
    }

    fn read_stat(
        &self,
        getter: unsafe extern "C" fn(VmGuestLibHandle, *mut u64) -> VmGuestLibErrorCode,
    ) -> Result<u64, GuestLibError> {
        let mut value = 0u64;
        // SAFETY: handle is open for the lifetime of self and `value` is a valid out-pointer
        check(unsafe { getter(self.handle, &mut value) })?;
        Ok(value)
    }
}

impl GuestIntrospection for VmGuestLib {
    fn update_info(&mut self) -> Result<(), GuestLibError> {
        // SAFETY: handle is open for the lifetime of self
        check(unsafe { VMGuestLib_UpdateInfo(self.handle) })
    }

    fn cpu_stolen_ms(&self) -> Result<u64, GuestLibError> {
        self.read_stat(VMGuestLib_GetCpuStolenMs)
    }

    fn cpu_used_ms(&self) -> Result<u64, GuestLibError> {
        self.read_stat(VMGuestLib_GetCpuUsedMs)
    }

    fn elapsed_ms(&self) -> Result<u64, GuestLibError> {
        self.read_stat(VMGuestLib_GetElapsedMs)
    }
}

impl Drop for VmGuestLib {
    fn drop(&mut self) {
        // SAFETY: handle was opened by VMGuestLib_OpenHandle and is closed exactly once
        if let Err(e) = check(unsafe { VMGuestLib_CloseHandle(self.handle) }) {
            debug!(error = %e, "Can't close guest library handle");
        }
    }
}
