//! # emulink
//!
//! Load shared libraries and resolve their exports, either through the
//! operating system loader or through a binary-translation emulator runtime
//! for libraries built for a foreign instruction set.
//!
//! # Architecture
//!
//! ```text
//! caller -> Loader (guards, logging) -+-> native  (dlopen / LoadLibraryA)
//!                                     +-> EmulatorRuntime -> LoadX64Library / RunX64Function
//! ```
//!
//! The backend is chosen once, at `open`, and carried by the returned
//! [`LibHandle`]; `symbol` and `close` dispatch on the handle's tag. The
//! emulator runtime is bootstrapped lazily and exactly once per
//! [`EmulatorRuntime`]; a bootstrap failure is reported as a fatal
//! [`LoadError::Bootstrap`] rather than terminating the process. Hosts that
//! want fail-fast behavior pass errors through [`abort_on_fatal`].
//!
//! The free functions ([`open`], [`close`], [`symbol`], [`error`]) use the
//! process-wide runtime configured from the environment (see
//! [`emulink_core::config`]).

pub mod emulator;
pub mod guard;
pub mod handle;
mod last_error;
pub mod loader;
mod native;
pub mod structured_log;

use std::ffi::c_void;
use std::ptr::NonNull;

pub use emulator::{EmulatorRuntime, EntryPointSource, EntryPoints, ImageEntryPointSource};
pub use emulink_core::dlfcn::{Backend, Visibility};
pub use emulink_core::{BootstrapError, EmulatorConfig, EntryPointNames, LoadError};
pub use handle::LibHandle;
pub use loader::Loader;

use structured_log::{LogLevel, Outcome};

/// Open `path` with the process-wide loader.
///
/// `global` requests process-global symbol visibility (native backend only);
/// `use_emulator` routes the load through the emulator runtime.
pub fn open(path: &str, global: bool, use_emulator: bool) -> Result<LibHandle, LoadError> {
    Loader::global().open(
        path,
        Visibility::from_flag(global),
        Backend::from_flag(use_emulator),
    )
}

/// Close a handle obtained from [`open`].
pub fn close(handle: LibHandle) -> Result<(), LoadError> {
    Loader::global().close(handle)
}

/// Resolve `name` as a raw address with the process-wide loader.
pub fn symbol_ptr(handle: &LibHandle, name: &str) -> Result<NonNull<c_void>, LoadError> {
    Loader::global().symbol_ptr(handle, name)
}

/// Resolve `name` as function pointer type `F` with the process-wide loader.
///
/// # Safety
///
/// Same contract as [`Loader::symbol`]: `F` must match the export exactly.
pub unsafe fn symbol<F: Copy>(handle: &LibHandle, name: &str) -> Result<F, LoadError> {
    // SAFETY: forwarded caller contract.
    unsafe { Loader::global().symbol(handle, name) }
}

/// Most recent loader failure on this thread. See [`Loader::error`].
pub fn error(filename: &str) -> Option<String> {
    Loader::global().error(filename)
}

/// Terminate the process if `err` is fatal; otherwise return.
///
/// Reports the error on stderr and as a `fatal` log record before aborting.
pub fn abort_on_fatal(err: &LoadError) {
    if !err.is_fatal() {
        return;
    }
    structured_log::emit(
        structured_log::event(LogLevel::Fatal, "process_abort")
            .with_outcome(Outcome::Fatal)
            .with_details(serde_json::json!({ "error": err.to_string() })),
    );
    structured_log::flush();
    eprintln!("{err}");
    std::process::abort();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_on_fatal_returns_for_recoverable_errors() {
        for err in [
            LoadError::EmptyPath,
            LoadError::SymbolNotFound { name: "cos".into() },
            LoadError::EmulatorNotInitialized,
            LoadError::Panicked { op: "open" },
        ] {
            abort_on_fatal(&err);
        }
    }
}
