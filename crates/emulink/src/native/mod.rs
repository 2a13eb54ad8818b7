//! Native OS loader backend.
//!
//! `dlopen`/`dlsym`/`dlclose`/`dlerror` on unix, `LoadLibraryA`/
//! `GetProcAddress`/`FreeLibrary`/`GetLastError` on Windows. Each function
//! returns the platform's diagnostic text on failure.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use unix::{close, last_error, open, symbol};

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use windows::{close, last_error, open, symbol};
