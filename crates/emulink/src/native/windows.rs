use std::ffi::{CStr, c_void};
use std::ptr::{self, NonNull};

use emulink_core::dlfcn::{self as dlfcn_core, Visibility};
use windows_sys::Win32::Foundation::{FreeLibrary, GetLastError, LocalFree};
use windows_sys::Win32::System::Diagnostics::Debug::{
    FORMAT_MESSAGE_ALLOCATE_BUFFER, FORMAT_MESSAGE_FROM_SYSTEM, FORMAT_MESSAGE_IGNORE_INSERTS,
    FormatMessageA,
};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryA};

// MAKELANGID(LANG_NEUTRAL, SUBLANG_DEFAULT)
const LANG_NEUTRAL_DEFAULT: u32 = 0x0400;

/// Longest message reported, matching the fixed buffer hosts historically used.
const MAX_MESSAGE: usize = 2048;

fn system_message(code: u32) -> Option<String> {
    let mut buffer: *mut u8 = ptr::null_mut();
    // SAFETY: with ALLOCATE_BUFFER the system allocates the output and stores
    // its address through the pointer we pass as `lpbuffer`; we free it with
    // LocalFree below.
    let len = unsafe {
        FormatMessageA(
            FORMAT_MESSAGE_ALLOCATE_BUFFER | FORMAT_MESSAGE_FROM_SYSTEM | FORMAT_MESSAGE_IGNORE_INSERTS,
            ptr::null(),
            code,
            LANG_NEUTRAL_DEFAULT,
            (&mut buffer as *mut *mut u8).cast::<u8>(),
            0,
            ptr::null(),
        )
    };
    if len == 0 || buffer.is_null() {
        return None;
    }
    // SAFETY: FormatMessageA wrote `len` bytes at `buffer`.
    let bytes = unsafe { std::slice::from_raw_parts(buffer, len as usize) };
    let text = String::from_utf8_lossy(bytes).trim_end().to_string();
    // SAFETY: buffer was allocated by FormatMessageA.
    unsafe { LocalFree(buffer.cast::<c_void>()) };
    Some(text)
}

fn format_last_error(filename: &str) -> Option<String> {
    // SAFETY: reads the calling thread's last-error value.
    let code = unsafe { GetLastError() };
    if code == 0 {
        return None;
    }
    let detail = system_message(code).unwrap_or_default();
    let mut message = format!("{filename}: error code {code}: {detail}");
    if message.len() > MAX_MESSAGE {
        let mut cut = MAX_MESSAGE;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
    }
    Some(message)
}

/// `LoadLibraryA` has no visibility control; `_visibility` is ignored.
pub(crate) fn open(path: &CStr, _visibility: Visibility) -> Result<NonNull<c_void>, String> {
    // SAFETY: path is NUL-terminated.
    let module = unsafe { LoadLibraryA(path.as_ptr().cast::<u8>()) };
    NonNull::new(module).ok_or_else(|| {
        format_last_error(&path.to_string_lossy())
            .unwrap_or_else(|| dlfcn_core::ERR_NOT_FOUND.to_string())
    })
}

/// # Safety
///
/// `handle` must be a live module handle from `LoadLibraryA`.
pub(crate) unsafe fn close(handle: NonNull<c_void>) -> Result<(), String> {
    // SAFETY: caller contract.
    if unsafe { FreeLibrary(handle.as_ptr()) } != 0 {
        Ok(())
    } else {
        Err(format_last_error("FreeLibrary")
            .unwrap_or_else(|| dlfcn_core::ERR_CLOSE_FAILED.to_string()))
    }
}

/// # Safety
///
/// `handle` must be a live module handle from `LoadLibraryA`.
pub(crate) unsafe fn symbol(handle: NonNull<c_void>, name: &CStr) -> Result<NonNull<c_void>, String> {
    // SAFETY: caller contract; name is NUL-terminated.
    let proc = unsafe { GetProcAddress(handle.as_ptr(), name.as_ptr().cast::<u8>()) };
    proc.and_then(|f| NonNull::new(f as *mut c_void)).ok_or_else(|| {
        format_last_error(&name.to_string_lossy()).unwrap_or_else(|| {
            format!("{}: {}", dlfcn_core::ERR_SYMBOL_NOT_FOUND, name.to_string_lossy())
        })
    })
}

pub(crate) fn last_error(filename: &str) -> Option<String> {
    format_last_error(filename)
}
