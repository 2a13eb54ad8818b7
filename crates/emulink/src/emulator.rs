//! Emulator runtime bootstrap and indirection.
//!
//! An [`EmulatorRuntime`] owns the three entry points of a binary-translation
//! runtime (box64 style):
//!
//! ```text
//! int   Initialize(void);
//! void* LoadX64Library(const char* path);
//! void* RunX64Function(const void* handle, const char* symbol);
//! ```
//!
//! Entry points are obtained from an [`EntryPointSource`] the first time an
//! emulator-mode operation needs them. Bootstrap runs under the runtime's
//! lock, so concurrent first callers see exactly one image load and one
//! `Initialize` call. A failed bootstrap is sticky: the runtime never retries
//! and keeps returning the same [`BootstrapError`].
//!
//! `EntryPointSource::resolve` runs with that lock held and must not call
//! back into the same runtime.

use std::ffi::{CStr, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use emulink_core::dlfcn::Visibility;
use emulink_core::{BootstrapError, EmulatorConfig, LoadError};
use parking_lot::Mutex;

use crate::guard::panic_message;
use crate::native;
use crate::structured_log::{self, LogLevel, Outcome};

pub type InitializeFn = unsafe extern "C" fn() -> c_int;
pub type LoadLibraryFn = unsafe extern "C" fn(path: *const c_char) -> *mut c_void;
pub type RunFunctionFn =
    unsafe extern "C" fn(handle: *const c_void, symbol: *const c_char) -> *mut c_void;

/// Resolved emulator entry points.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoints {
    pub initialize: InitializeFn,
    pub load_library: LoadLibraryFn,
    pub run_function: RunFunctionFn,
}

/// Locates the emulator runtime and resolves its entry points.
pub trait EntryPointSource: Send + Sync {
    /// Called at most once per runtime, with the bootstrap lock held.
    fn resolve(&self, config: &EmulatorConfig) -> Result<EntryPoints, BootstrapError>;
}

impl<F> EntryPointSource for F
where
    F: Fn(&EmulatorConfig) -> Result<EntryPoints, BootstrapError> + Send + Sync,
{
    fn resolve(&self, config: &EmulatorConfig) -> Result<EntryPoints, BootstrapError> {
        self(config)
    }
}

/// Loads the runtime image with the native loader and looks the entry points up by name.
///
/// The image stays loaded for the life of the process once all three entry
/// points resolve; it is unloaded again if any of them is missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageEntryPointSource;

impl ImageEntryPointSource {
    fn lookup(image: NonNull<c_void>, name: &str) -> Result<NonNull<c_void>, BootstrapError> {
        let missing = |reason: String| BootstrapError::MissingEntryPoint {
            name: name.to_string(),
            reason,
        };
        let cname = emulink_core::dlfcn::symbol_to_cstring(name).map_err(|e| missing(e.to_string()))?;
        // SAFETY: image is the live handle opened in `resolve`, still open here.
        unsafe { native::symbol(image, &cname) }.map_err(missing)
    }
}

impl EntryPointSource for ImageEntryPointSource {
    fn resolve(&self, config: &EmulatorConfig) -> Result<EntryPoints, BootstrapError> {
        if let Some(dir) = &config.library_path {
            // SAFETY: set_var is unsound only when another thread reads the
            // environment concurrently. This runs once, under the bootstrap
            // lock, before the emulator (the variable's reader) is loaded.
            unsafe { std::env::set_var(&config.library_path_var, dir) };
        }

        let image_path = config.runtime_image.to_string_lossy();
        let not_found = |reason: String| BootstrapError::ImageNotFound {
            path: config.runtime_image.clone(),
            reason,
        };
        let cpath = emulink_core::dlfcn::path_to_cstring(&image_path)
            .map_err(|e| not_found(e.to_string()))?;
        let image = native::open(&cpath, Visibility::Global).map_err(not_found)?;

        let names = &config.entry_points;
        let resolved = Self::lookup(image, &names.initialize).and_then(|initialize| {
            Ok((
                initialize,
                Self::lookup(image, &names.load_library)?,
                Self::lookup(image, &names.run_function)?,
            ))
        });
        let (initialize, load_library, run_function) = match resolved {
            Ok(found) => found,
            Err(err) => {
                // SAFETY: image was opened above and nothing else holds it.
                let _ = unsafe { native::close(image) };
                return Err(err);
            }
        };

        // SAFETY: the emulator ABI defines these exports with exactly the
        // signatures of the target types. Mismatch is a broken runtime image.
        unsafe {
            Ok(EntryPoints {
                initialize: std::mem::transmute::<*mut c_void, InitializeFn>(initialize.as_ptr()),
                load_library: std::mem::transmute::<*mut c_void, LoadLibraryFn>(
                    load_library.as_ptr(),
                ),
                run_function: std::mem::transmute::<*mut c_void, RunFunctionFn>(
                    run_function.as_ptr(),
                ),
            })
        }
    }
}

#[derive(Debug)]
enum RuntimeState {
    Uninit,
    Ready(EntryPoints),
    Failed(BootstrapError),
}

/// Lazily bootstrapped emulator runtime.
pub struct EmulatorRuntime {
    config: EmulatorConfig,
    source: Box<dyn EntryPointSource>,
    state: Mutex<RuntimeState>,
}

static GLOBAL_RUNTIME: OnceLock<Arc<EmulatorRuntime>> = OnceLock::new();

impl EmulatorRuntime {
    pub fn new(config: EmulatorConfig, source: impl EntryPointSource + 'static) -> Self {
        Self {
            config,
            source: Box::new(source),
            state: Mutex::new(RuntimeState::Uninit),
        }
    }

    /// Runtime configured from the environment, loading the real image.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(EmulatorConfig::from_env(), ImageEntryPointSource)
    }

    /// The process-wide runtime, created from the environment on first use
    /// unless one was installed earlier.
    pub fn global() -> &'static Arc<EmulatorRuntime> {
        GLOBAL_RUNTIME.get_or_init(|| Arc::new(Self::from_env()))
    }

    /// Make `runtime` the process-wide runtime.
    ///
    /// Fails, handing `runtime` back, once the global runtime exists.
    pub fn install_global(runtime: Arc<EmulatorRuntime>) -> Result<(), Arc<EmulatorRuntime>> {
        GLOBAL_RUNTIME.set(runtime)
    }

    #[must_use]
    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    /// `true` once bootstrap has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(*self.state.lock(), RuntimeState::Ready(_))
    }

    /// Entry points, if bootstrap already succeeded. Never bootstraps.
    #[must_use]
    pub fn entry_points(&self) -> Option<EntryPoints> {
        match *self.state.lock() {
            RuntimeState::Ready(entry) => Some(entry),
            _ => None,
        }
    }

    /// Bootstrap the runtime if needed and return its entry points.
    pub fn ensure_initialized(&self) -> Result<EntryPoints, BootstrapError> {
        let mut state = self.state.lock();
        match &*state {
            RuntimeState::Ready(entry) => return Ok(*entry),
            RuntimeState::Failed(err) => return Err(err.clone()),
            RuntimeState::Uninit => {}
        }

        let result = self.bootstrap();
        *state = match &result {
            Ok(entry) => RuntimeState::Ready(*entry),
            Err(err) => RuntimeState::Failed(err.clone()),
        };
        result
    }

    fn bootstrap(&self) -> Result<EntryPoints, BootstrapError> {
        let image = self.config.runtime_image.to_string_lossy().into_owned();
        let result = catch_unwind(AssertUnwindSafe(|| {
            let entry = self.source.resolve(&self.config)?;
            // SAFETY: Initialize takes no arguments; the source vouches for the signature.
            let code = unsafe { (entry.initialize)() };
            if code != 0 {
                return Err(BootstrapError::InitializeFailed { code });
            }
            Ok(entry)
        }))
        .unwrap_or_else(|payload| {
            structured_log::emit(
                structured_log::event(LogLevel::Error, "panic_caught")
                    .with_op("bootstrap")
                    .with_details(serde_json::json!({ "message": panic_message(&*payload) })),
            );
            Err(BootstrapError::Panicked)
        });

        match &result {
            Ok(_) => structured_log::emit(
                structured_log::event(LogLevel::Info, "emulator_initialized")
                    .with_op("bootstrap")
                    .with_backend("emulator")
                    .with_path(image)
                    .with_outcome(Outcome::Ok),
            ),
            Err(err) => structured_log::emit(
                structured_log::event(LogLevel::Fatal, "emulator_bootstrap_failed")
                    .with_op("bootstrap")
                    .with_backend("emulator")
                    .with_path(image)
                    .with_outcome(Outcome::Fatal)
                    .with_details(serde_json::json!({ "error": err.to_string() })),
            ),
        }
        result
    }

    /// Load a foreign-ISA library through the emulator, bootstrapping first.
    pub fn load_foreign_library(&self, path: &CStr) -> Result<NonNull<c_void>, LoadError> {
        let entry = self.ensure_initialized()?;
        // SAFETY: path is NUL-terminated; entry points come from a successful bootstrap.
        let handle = unsafe { (entry.load_library)(path.as_ptr()) };
        NonNull::new(handle).ok_or_else(|| LoadError::EmulatorLoad {
            path: path.to_string_lossy().into_owned(),
        })
    }

    /// Resolve `name` in an emulator-loaded library as a host-callable address.
    ///
    /// Does not bootstrap: the handle can only exist if a previous
    /// [`load_foreign_library`](Self::load_foreign_library) did.
    pub fn invoke_foreign_symbol(
        &self,
        handle: NonNull<c_void>,
        name: &CStr,
    ) -> Result<NonNull<c_void>, LoadError> {
        let entry = self.entry_points().ok_or(LoadError::EmulatorNotInitialized)?;
        // SAFETY: handle came from this runtime's load_library; name is NUL-terminated.
        let sym = unsafe { (entry.run_function)(handle.as_ptr().cast_const(), name.as_ptr()) };
        NonNull::new(sym).ok_or_else(|| LoadError::SymbolNotFound {
            name: name.to_string_lossy().into_owned(),
        })
    }
}

impl std::fmt::Debug for EmulatorRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorRuntime")
            .field("config", &self.config)
            .field("state", &self.state.try_lock().as_deref())
            .finish_non_exhaustive()
    }
}
