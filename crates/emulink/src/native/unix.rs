use std::ffi::{CStr, c_void};
use std::ptr::NonNull;

use emulink_core::dlfcn::{self as dlfcn_core, Visibility};

fn dlopen_flags(visibility: Visibility) -> libc::c_int {
    libc::RTLD_NOW
        | if visibility.is_global() {
            libc::RTLD_GLOBAL
        } else {
            libc::RTLD_LOCAL
        }
}

/// Take and format the pending `dlerror` message, if any.
fn dlerror_message() -> Option<String> {
    // SAFETY: dlerror returns null or a NUL-terminated string owned by libdl,
    // valid until the next dl* call on this thread. We copy it out immediately.
    unsafe {
        let msg = libc::dlerror();
        if msg.is_null() {
            None
        } else {
            Some(CStr::from_ptr(msg).to_string_lossy().into_owned())
        }
    }
}

pub(crate) fn open(path: &CStr, visibility: Visibility) -> Result<NonNull<c_void>, String> {
    // SAFETY: path is NUL-terminated. Running the image's constructors is the
    // point of the call.
    let handle = unsafe { libc::dlopen(path.as_ptr(), dlopen_flags(visibility)) };
    NonNull::new(handle)
        .ok_or_else(|| dlerror_message().unwrap_or_else(|| dlfcn_core::ERR_NOT_FOUND.to_string()))
}

/// # Safety
///
/// `handle` must be a live `dlopen` handle that is not closed again afterwards.
pub(crate) unsafe fn close(handle: NonNull<c_void>) -> Result<(), String> {
    // SAFETY: caller contract.
    let rc = unsafe { libc::dlclose(handle.as_ptr()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(dlerror_message().unwrap_or_else(|| dlfcn_core::ERR_CLOSE_FAILED.to_string()))
    }
}

/// # Safety
///
/// `handle` must be a live `dlopen` handle.
pub(crate) unsafe fn symbol(handle: NonNull<c_void>, name: &CStr) -> Result<NonNull<c_void>, String> {
    // Drop any stale message so a failure below reports this lookup.
    let _ = dlerror_message();
    // SAFETY: caller contract; name is NUL-terminated.
    let sym = unsafe { libc::dlsym(handle.as_ptr(), name.as_ptr()) };
    NonNull::new(sym).ok_or_else(|| {
        dlerror_message().unwrap_or_else(|| {
            format!("{}: {}", dlfcn_core::ERR_SYMBOL_NOT_FOUND, name.to_string_lossy())
        })
    })
}

/// `dlerror` is not tied to a file, so `filename` is unused here.
pub(crate) fn last_error(_filename: &str) -> Option<String> {
    dlerror_message()
}
