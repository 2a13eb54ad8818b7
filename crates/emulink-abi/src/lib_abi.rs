//! ABI layer for library loading.
//!
//! `emulink_lib_open`, `emulink_lib_close`, `emulink_lib_symbol`,
//! `emulink_lib_error`. Delegates to the process-wide [`emulink::Loader`],
//! with null/empty argument checks done here before anything is loaded.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};
use std::ptr;

use emulink::guard;
use emulink::structured_log::{self, LogLevel};
use emulink::{Backend, LibHandle, LoadError, Loader, Visibility};
use emulink_core::config::{FatalPolicy, fatal_policy};

// ---------------------------------------------------------------------------
// Thread-local error text
// ---------------------------------------------------------------------------

std::thread_local! {
    static ERROR_TEXT: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store `message` as this thread's error text and return a pointer to it.
///
/// The pointer stays valid until the next `emulink_lib_error` on this thread.
fn publish_error(message: String) -> *const c_char {
    let text = CString::new(message.replace('\0', " ")).unwrap_or_default();
    ERROR_TEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        *slot = Some(text);
        slot.as_ref().map_or(ptr::null(), |text| text.as_ptr())
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Borrow a C string argument. Null, empty, and non-UTF-8 input are rejected.
///
/// # Safety
///
/// `arg` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn str_arg<'a>(arg: *const c_char, op: &'static str, what: &'static str) -> Option<&'a str> {
    if !guard::precondition(!arg.is_null(), op, what) {
        return None;
    }
    // SAFETY: non-null per the check above; NUL-termination is the caller's contract.
    let text = unsafe { CStr::from_ptr(arg) }.to_str().ok();
    let text = text.filter(|t| !t.is_empty());
    if guard::precondition(text.is_some(), op, what) {
        text
    } else {
        None
    }
}

/// Apply the configured fatal policy to `err`.
fn escalate(err: &LoadError) {
    if err.is_fatal() && fatal_policy() == FatalPolicy::Abort {
        emulink::abort_on_fatal(err);
    }
}

// ---------------------------------------------------------------------------
// emulink_lib_open
// ---------------------------------------------------------------------------

abi_fn! {
    /// Open the library at `filename`.
    ///
    /// `global` requests `RTLD_GLOBAL` visibility (native loader only);
    /// `use_emulator` routes the load through the emulator runtime,
    /// bootstrapping it on first use. Returns null on failure, in which case
    /// `emulink_lib_error` has the reason.
    fn emulink_lib_open(filename: *const c_char, global: bool, use_emulator: bool) -> *mut c_void
        = ptr::null_mut();
    {
        // SAFETY: caller passes null or a NUL-terminated string.
        let Some(path) = (unsafe { str_arg(filename, "open", "filename non-empty") }) else {
            return ptr::null_mut();
        };
        let opened = Loader::global().open(
            path,
            Visibility::from_flag(global),
            Backend::from_flag(use_emulator),
        );
        match opened {
            Ok(handle) => Box::into_raw(Box::new(handle)).cast::<c_void>(),
            Err(err) => {
                escalate(&err);
                ptr::null_mut()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// emulink_lib_close
// ---------------------------------------------------------------------------

abi_fn! {
    /// Close a library returned by `emulink_lib_open`.
    ///
    /// Returns `false` for a null handle without calling any loader. The
    /// handle is invalid afterwards whatever the result.
    fn emulink_lib_close(lib: *mut c_void) -> bool = false;
    {
        if !guard::precondition(!lib.is_null(), "close", "handle non-null") {
            return false;
        }
        // SAFETY: non-null handles only come from emulink_lib_open, which
        // leaked a Box<LibHandle>; ownership returns here exactly once.
        let handle = unsafe { Box::from_raw(lib.cast::<LibHandle>()) };
        Loader::global().close(*handle).is_ok()
    }
}

// ---------------------------------------------------------------------------
// emulink_lib_symbol
// ---------------------------------------------------------------------------

abi_fn! {
    /// Look `symbol` up in `lib`. Returns null if it is absent.
    ///
    /// The backend is the one that opened `lib`; a `use_emulator` flag that
    /// disagrees with it is logged and otherwise ignored.
    fn emulink_lib_symbol(lib: *mut c_void, symbol: *const c_char, use_emulator: bool) -> *mut c_void
        = ptr::null_mut();
    {
        if !guard::precondition(!lib.is_null(), "symbol", "handle non-null") {
            return ptr::null_mut();
        }
        // SAFETY: caller passes null or a NUL-terminated string.
        let Some(name) = (unsafe { str_arg(symbol, "symbol", "symbol non-empty") }) else {
            return ptr::null_mut();
        };
        // SAFETY: non-null handles point at a live LibHandle from emulink_lib_open.
        let handle = unsafe { &*lib.cast::<LibHandle>() };
        if handle.backend() != Backend::from_flag(use_emulator) {
            structured_log::emit(
                structured_log::event(LogLevel::Warn, "backend_flag_mismatch")
                    .with_op("symbol")
                    .with_backend(handle.backend().as_str())
                    .with_symbol(name),
            );
        }
        Loader::global()
            .symbol_ptr(handle, name)
            .map_or(ptr::null_mut(), |sym| sym.as_ptr())
    }
}

// ---------------------------------------------------------------------------
// emulink_lib_error
// ---------------------------------------------------------------------------

abi_fn! {
    /// Describe the most recent loader failure on this thread.
    ///
    /// `filename` labels the message on Windows. `use_emulator` is accepted
    /// for signature compatibility; failures from both backends are reported.
    /// Returns null when there is nothing to report. The string is owned by
    /// the library and valid until the next call on the same thread.
    fn emulink_lib_error(filename: *const c_char, use_emulator: bool) -> *const c_char
        = ptr::null();
    {
        let _ = use_emulator;
        // SAFETY: caller passes null or a NUL-terminated string.
        let Some(filename) = (unsafe { str_arg(filename, "error", "filename non-empty") }) else {
            return ptr::null();
        };
        Loader::global()
            .error(filename)
            .map_or(ptr::null(), publish_error)
    }
}
