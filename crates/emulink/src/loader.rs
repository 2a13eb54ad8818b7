//! Open/close/symbol/error dispatch.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use emulink_core::LoadError;
use emulink_core::dlfcn::{self as dlfcn_core, Backend, Visibility};

use crate::emulator::EmulatorRuntime;
use crate::handle::LibHandle;
use crate::structured_log::{self, LogLevel, Outcome};
use crate::{guard, last_error, native};

/// Dispatches library operations to the native loader or an emulator runtime.
///
/// Cheap to clone; clones share the runtime.
#[derive(Debug, Clone)]
pub struct Loader {
    runtime: Arc<EmulatorRuntime>,
}

impl Default for Loader {
    fn default() -> Self {
        Self::global()
    }
}

impl Loader {
    /// Loader routing emulator operations through `runtime`.
    #[must_use]
    pub fn new(runtime: Arc<EmulatorRuntime>) -> Self {
        Self { runtime }
    }

    /// Loader backed by the process-wide runtime.
    #[must_use]
    pub fn global() -> Self {
        Self::new(Arc::clone(EmulatorRuntime::global()))
    }

    #[must_use]
    pub fn runtime(&self) -> &Arc<EmulatorRuntime> {
        &self.runtime
    }

    /// Open the library at `path`.
    ///
    /// `visibility` only applies to the native backend. The emulator backend
    /// bootstraps its runtime on first use; a bootstrap failure comes back as
    /// [`LoadError::Bootstrap`], which [`LoadError::is_fatal`] flags.
    pub fn open(
        &self,
        path: &str,
        visibility: Visibility,
        backend: Backend,
    ) -> Result<LibHandle, LoadError> {
        if !guard::precondition(dlfcn_core::valid_path(path), "open", "path non-empty") {
            let err = dlfcn_core::path_to_cstring(path).err().unwrap_or(LoadError::EmptyPath);
            return report("open", backend, Some(path), None, Err(err));
        }
        let result = guard::catch("open", || {
            let cpath = dlfcn_core::path_to_cstring(path)?;
            match backend {
                Backend::Native => native::open(&cpath, visibility)
                    .map(LibHandle::Native)
                    .map_err(|message| LoadError::Native { message }),
                Backend::Emulator => self
                    .runtime
                    .load_foreign_library(&cpath)
                    .map(LibHandle::Emulated),
            }
        });
        report("open", backend, Some(path), None, result)
    }

    /// Release `handle`.
    ///
    /// Emulated handles have no unload entry point in the emulator ABI, so
    /// they are released without touching the native loader and the library
    /// stays resident inside the emulator.
    pub fn close(&self, handle: LibHandle) -> Result<(), LoadError> {
        let backend = handle.backend();
        let result = guard::catch("close", || match handle {
            // SAFETY: a Native handle came from native::open and, being
            // consumed here, cannot be closed twice.
            LibHandle::Native(ptr) => {
                unsafe { native::close(ptr) }.map_err(|message| LoadError::Native { message })
            }
            LibHandle::Emulated(_) => {
                structured_log::emit(
                    structured_log::event(LogLevel::Debug, "emulated_handle_released")
                        .with_op("close")
                        .with_backend(Backend::Emulator.as_str()),
                );
                Ok(())
            }
        });
        report("close", backend, None, None, result)
    }

    /// Resolve `name` in `handle` as a raw address.
    ///
    /// The backend is taken from the handle's tag.
    pub fn symbol_ptr(&self, handle: &LibHandle, name: &str) -> Result<NonNull<c_void>, LoadError> {
        let backend = handle.backend();
        if !guard::precondition(dlfcn_core::valid_symbol(name), "symbol", "name non-empty") {
            let err = dlfcn_core::symbol_to_cstring(name)
                .err()
                .unwrap_or(LoadError::EmptySymbol);
            return report("symbol", backend, None, Some(name), Err(err));
        }
        let mut platform_message = None;
        let result = guard::catch("symbol", || {
            let cname = dlfcn_core::symbol_to_cstring(name)?;
            match *handle {
                // SAFETY: the handle is live for as long as the borrow.
                LibHandle::Native(ptr) => unsafe { native::symbol(ptr, &cname) }.map_err(|message| {
                    platform_message = Some(message);
                    LoadError::SymbolNotFound {
                        name: name.to_string(),
                    }
                }),
                LibHandle::Emulated(ptr) => self.runtime.invoke_foreign_symbol(ptr, &cname),
            }
        });
        let result = report("symbol", backend, None, Some(name), result);
        // `error()` reports the loader's own text for native misses.
        if let (Err(_), Some(message)) = (&result, platform_message) {
            last_error::record(message);
        }
        result
    }

    /// Resolve `name` in `handle` as a value of function pointer type `F`.
    ///
    /// # Safety
    ///
    /// `F` must be a function pointer type (or `Option` of one) whose
    /// signature and calling convention match the exported symbol exactly.
    /// Nothing here can check that; calling through a mismatched `F` is
    /// undefined behavior. The returned pointer is only valid while the
    /// library stays open.
    pub unsafe fn symbol<F: Copy>(&self, handle: &LibHandle, name: &str) -> Result<F, LoadError> {
        const {
            assert!(
                size_of::<F>() == size_of::<*mut c_void>(),
                "symbol type must be pointer-sized"
            );
        }
        let ptr = self.symbol_ptr(handle, name)?.as_ptr();
        // SAFETY: sizes match (checked above); validity of F is the caller's obligation.
        Ok(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&ptr) })
    }

    /// Most recent loader failure on this thread, as text.
    ///
    /// Prefers the message recorded by the last failing open/close/symbol
    /// (either backend), then the platform's own error state. `filename` is
    /// only used to label the message on Windows. Returns `None` when there is
    /// nothing to report; reading clears the message.
    pub fn error(&self, filename: &str) -> Option<String> {
        if !guard::precondition(!filename.is_empty(), "error", "filename non-empty") {
            return None;
        }
        guard::catch_or_none("error", || {
            last_error::take()
                .or_else(|| native::last_error(filename))
                .filter(|message| !message.is_empty())
        })
    }
}

/// Log the outcome of an operation and record failures for [`Loader::error`].
fn report<T>(
    op: &'static str,
    backend: Backend,
    path: Option<&str>,
    symbol: Option<&str>,
    result: Result<T, LoadError>,
) -> Result<T, LoadError> {
    let (level, event, outcome) = match &result {
        Ok(_) => (LogLevel::Debug, "op_ok", Outcome::Ok),
        Err(err) if err.is_fatal() => (LogLevel::Fatal, "op_fatal", Outcome::Fatal),
        Err(err) if err.is_precondition() => (LogLevel::Debug, "op_rejected", Outcome::Rejected),
        Err(_) => (LogLevel::Info, "op_failed", Outcome::Failed),
    };
    let mut entry = structured_log::event(level, event)
        .with_op(op)
        .with_backend(backend.as_str())
        .with_outcome(outcome);
    if let Some(path) = path {
        entry = entry.with_path(path);
    }
    if let Some(symbol) = symbol {
        entry = entry.with_symbol(symbol);
    }
    if let Err(err) = &result {
        last_error::record(err.to_string());
        entry = entry.with_details(serde_json::json!({ "error": err.to_string() }));
    }
    structured_log::emit(entry);
    result
}
