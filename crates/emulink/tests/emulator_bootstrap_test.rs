//! Integration test: emulator bootstrap and indirection against fake runtimes.
//!
//! Each fake runtime gets its own counters so tests can run in parallel.
//!
//! Run: cargo test -p emulink --test emulator_bootstrap_test

use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use emulink::{
    Backend, BootstrapError, EmulatorConfig, EmulatorRuntime, EntryPoints, LoadError, Loader,
    Visibility,
};

type AddFn = extern "C" fn(c_int, c_int) -> c_int;

extern "C" fn foreign_add(a: c_int, b: c_int) -> c_int {
    a + b
}

/// Defines a module holding a fake emulator runtime with private call counters.
///
/// The fake "translates" any library path except ones ending in `.missing`,
/// and exports a single function, `add`.
macro_rules! fake_emulator {
    ($name:ident, init = $init:expr) => {
        mod $name {
            use super::*;

            pub static IMAGE_LOADS: AtomicUsize = AtomicUsize::new(0);
            pub static INIT_CALLS: AtomicUsize = AtomicUsize::new(0);
            pub static LIBRARY_LOADS: AtomicUsize = AtomicUsize::new(0);

            unsafe extern "C" fn initialize() -> c_int {
                INIT_CALLS.fetch_add(1, Ordering::SeqCst);
                $init
            }

            unsafe extern "C" fn load_library(path: *const c_char) -> *mut c_void {
                LIBRARY_LOADS.fetch_add(1, Ordering::SeqCst);
                // SAFETY: the loader passes a NUL-terminated path.
                let path = unsafe { CStr::from_ptr(path) };
                if path.to_bytes().ends_with(b".missing") {
                    return std::ptr::null_mut();
                }
                Box::into_raw(Box::new(path.to_owned())).cast()
            }

            unsafe extern "C" fn run_function(
                _handle: *const c_void,
                symbol: *const c_char,
            ) -> *mut c_void {
                // SAFETY: the loader passes a NUL-terminated name.
                let symbol = unsafe { CStr::from_ptr(symbol) };
                if symbol.to_bytes() == b"add" {
                    foreign_add as AddFn as *mut c_void
                } else {
                    std::ptr::null_mut()
                }
            }

            pub fn loader() -> Loader {
                let runtime = EmulatorRuntime::new(
                    EmulatorConfig::default().with_library_path(None),
                    |_: &EmulatorConfig| -> Result<EntryPoints, BootstrapError> {
                        IMAGE_LOADS.fetch_add(1, Ordering::SeqCst);
                        // Widen the window in which concurrent first callers overlap.
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(EntryPoints {
                            initialize,
                            load_library,
                            run_function,
                        })
                    },
                );
                Loader::new(Arc::new(runtime))
            }
        }
    };
}

fake_emulator!(sequential, init = 0);
fake_emulator!(concurrent, init = 0);
fake_emulator!(symbols, init = 0);
fake_emulator!(missing_library, init = 0);
fake_emulator!(unwilling, init = 3);
fake_emulator!(untouched, init = 0);

#[test]
fn sequential_opens_bootstrap_once() {
    let loader = sequential::loader();
    let first = loader
        .open("libforeign.so", Visibility::Local, Backend::Emulator)
        .unwrap();
    let second = loader
        .open("libforeign.so", Visibility::Global, Backend::Emulator)
        .unwrap();

    assert_eq!(sequential::IMAGE_LOADS.load(Ordering::SeqCst), 1);
    assert_eq!(sequential::INIT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(sequential::LIBRARY_LOADS.load(Ordering::SeqCst), 2);
    assert_ne!(first, second);
    assert!(loader.runtime().is_initialized());
}

#[test]
fn concurrent_first_opens_bootstrap_once() {
    const THREADS: usize = 8;
    let loader = concurrent::loader();
    let barrier = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let loader = loader.clone();
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                loader
                    .open(&format!("libforeign{i}.so"), Visibility::Local, Backend::Emulator)
                    .map(|handle| handle.backend())
            })
        })
        .collect();

    for worker in workers {
        assert_eq!(worker.join().unwrap(), Ok(Backend::Emulator));
    }
    assert_eq!(concurrent::IMAGE_LOADS.load(Ordering::SeqCst), 1);
    assert_eq!(concurrent::INIT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(concurrent::LIBRARY_LOADS.load(Ordering::SeqCst), THREADS);
}

#[test]
fn emulated_symbols_dispatch_on_handle_tag() {
    let loader = symbols::loader();
    let handle = loader
        .open("libforeign.so", Visibility::Local, Backend::Emulator)
        .unwrap();
    assert_eq!(handle.backend(), Backend::Emulator);

    // SAFETY: the fake runtime returns `foreign_add`, which has type AddFn.
    let add: AddFn = unsafe { loader.symbol(&handle, "add") }.unwrap();
    assert_eq!(add(2, 3), 5);

    assert_eq!(
        loader.symbol_ptr(&handle, "sub").unwrap_err(),
        LoadError::SymbolNotFound { name: "sub".into() }
    );
    assert_eq!(loader.symbol_ptr(&handle, "").unwrap_err(), LoadError::EmptySymbol);

    loader.close(handle).unwrap();
    assert_eq!(symbols::INIT_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn emulated_load_failure_is_recoverable_and_reported() {
    let loader = missing_library::loader();
    let err = loader
        .open("libforeign.missing", Visibility::Local, Backend::Emulator)
        .unwrap_err();
    assert_eq!(
        err,
        LoadError::EmulatorLoad {
            path: "libforeign.missing".into()
        }
    );
    assert!(!err.is_fatal());

    let message = loader.error("libforeign.missing").unwrap();
    assert!(message.contains("libforeign.missing"), "{message}");
}

#[test]
fn failed_initialize_is_fatal_and_never_retried() {
    let loader = unwilling::loader();
    for _ in 0..3 {
        let err = loader
            .open("libforeign.so", Visibility::Local, Backend::Emulator)
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err,
            LoadError::Bootstrap(BootstrapError::InitializeFailed { code: 3 })
        );
    }
    assert_eq!(unwilling::IMAGE_LOADS.load(Ordering::SeqCst), 1);
    assert_eq!(unwilling::INIT_CALLS.load(Ordering::SeqCst), 1);
    assert_eq!(unwilling::LIBRARY_LOADS.load(Ordering::SeqCst), 0);
    assert!(!loader.runtime().is_initialized());
}

#[test]
fn rejected_open_never_bootstraps() {
    let loader = untouched::loader();
    assert_eq!(
        loader.open("", Visibility::Local, Backend::Emulator).unwrap_err(),
        LoadError::EmptyPath
    );
    // Native opens never touch the emulator either.
    let _ = loader.open(
        "/nonexistent/emulink/libnative.so",
        Visibility::Local,
        Backend::Native,
    );
    assert_eq!(untouched::IMAGE_LOADS.load(Ordering::SeqCst), 0);
    assert_eq!(untouched::INIT_CALLS.load(Ordering::SeqCst), 0);
    assert!(loader.runtime().entry_points().is_none());
}
