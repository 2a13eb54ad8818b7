//! Library handle abstraction.

use std::ffi::c_void;
use std::ptr::NonNull;

use emulink_core::dlfcn::Backend;

/// An open library image, tagged with the backend that produced it.
///
/// Owned exclusively by whoever received it from `open` and consumed by
/// `close`, so a handle cannot be closed twice or used after closing through
/// the safe API. Not `Clone`.
#[derive(Debug, PartialEq, Eq, Hash)]
pub enum LibHandle {
    /// `dlopen` handle, or `HMODULE` on Windows.
    Native(NonNull<c_void>),
    /// Opaque handle returned by the emulator's library loader.
    Emulated(NonNull<c_void>),
}

// SAFETY: the payload is an opaque token the loaders accept from any thread;
// this crate never dereferences it.
unsafe impl Send for LibHandle {}
// SAFETY: as above; `&LibHandle` only exposes the token by value.
unsafe impl Sync for LibHandle {}

impl LibHandle {
    /// Backend that must service `symbol` and `close` for this handle.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        match self {
            Self::Native(_) => Backend::Native,
            Self::Emulated(_) => Backend::Emulator,
        }
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut c_void {
        match self {
            Self::Native(ptr) | Self::Emulated(ptr) => ptr.as_ptr(),
        }
    }

    /// Give up ownership, returning the backend tag and raw token.
    #[must_use]
    pub fn into_raw(self) -> (Backend, NonNull<c_void>) {
        match self {
            Self::Native(ptr) => (Backend::Native, ptr),
            Self::Emulated(ptr) => (Backend::Emulator, ptr),
        }
    }

    /// Rebuild a handle from [`into_raw`](Self::into_raw) output.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `into_raw` on a handle with the same
    /// `backend`, and must not have been closed since.
    #[must_use]
    pub unsafe fn from_raw(backend: Backend, ptr: NonNull<c_void>) -> Self {
        match backend {
            Backend::Native => Self::Native(ptr),
            Backend::Emulator => Self::Emulated(ptr),
        }
    }
}
