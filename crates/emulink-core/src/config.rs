//! Runtime configuration.
//!
//! Everything is resolved from the environment, with documented defaults:
//!
//! - `EMULINK_EMULATOR_IMAGE`: emulator runtime image (default `libbox64.so`,
//!   resolved through the native loader search path).
//! - `EMULINK_EMULATOR_LIBS`: directory of foreign-ISA support libraries the
//!   emulator should search (default `/usr/lib/box64-x86_64-linux-gnu`; set it
//!   to an empty string to export nothing).
//! - `EMULINK_EMULATOR_LIBS_VAR`: name of the variable the emulator reads that
//!   directory from (default `BOX64_LD_LIBRARY_PATH`).
//! - `EMULINK_LOG`: structured log threshold (`trace`, `debug`, `info`, `warn`
//!   (default), `error`, `fatal`, `off`).
//! - `EMULINK_FATAL`: what the C ABI does on bootstrap failure, `abort`
//!   (default) or `return`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

pub const ENV_EMULATOR_IMAGE: &str = "EMULINK_EMULATOR_IMAGE";
pub const ENV_EMULATOR_LIBS: &str = "EMULINK_EMULATOR_LIBS";
pub const ENV_EMULATOR_LIBS_VAR: &str = "EMULINK_EMULATOR_LIBS_VAR";
pub const ENV_LOG: &str = "EMULINK_LOG";
pub const ENV_FATAL: &str = "EMULINK_FATAL";

pub const DEFAULT_EMULATOR_IMAGE: &str = "libbox64.so";
pub const DEFAULT_EMULATOR_LIBS: &str = "/usr/lib/box64-x86_64-linux-gnu";
pub const DEFAULT_EMULATOR_LIBS_VAR: &str = "BOX64_LD_LIBRARY_PATH";

/// Names of the three entry points exported by the emulator runtime image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryPointNames {
    /// `int Initialize(void)`; zero means success.
    pub initialize: String,
    /// `void* LoadX64Library(const char* path)`.
    pub load_library: String,
    /// `void* RunX64Function(const void* handle, const char* symbol)`.
    pub run_function: String,
}

impl Default for EntryPointNames {
    fn default() -> Self {
        Self {
            initialize: "Initialize".to_string(),
            load_library: "LoadX64Library".to_string(),
            run_function: "RunX64Function".to_string(),
        }
    }
}

/// Where the emulator runtime lives and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    pub runtime_image: PathBuf,
    /// Exported as `library_path_var` before the image is loaded, if set.
    pub library_path: Option<PathBuf>,
    pub library_path_var: String,
    pub entry_points: EntryPointNames,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            runtime_image: PathBuf::from(DEFAULT_EMULATOR_IMAGE),
            library_path: Some(PathBuf::from(DEFAULT_EMULATOR_LIBS)),
            library_path_var: DEFAULT_EMULATOR_LIBS_VAR.to_string(),
            entry_points: EntryPointNames::default(),
        }
    }
}

impl EmulatorConfig {
    /// Resolve the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(image) = lookup(ENV_EMULATOR_IMAGE).filter(|v| !v.is_empty()) {
            config.runtime_image = PathBuf::from(image);
        }
        if let Some(libs) = lookup(ENV_EMULATOR_LIBS) {
            config.library_path = (!libs.is_empty()).then(|| PathBuf::from(libs));
        }
        if let Some(var) = lookup(ENV_EMULATOR_LIBS_VAR).filter(|v| !v.is_empty()) {
            config.library_path_var = var;
        }
        config
    }

    #[must_use]
    pub fn with_runtime_image(mut self, path: impl Into<PathBuf>) -> Self {
        self.runtime_image = path.into();
        self
    }

    #[must_use]
    pub fn with_library_path(mut self, path: Option<PathBuf>) -> Self {
        self.library_path = path;
        self
    }

    #[must_use]
    pub fn with_library_path_var(mut self, var: impl Into<String>) -> Self {
        self.library_path_var = var.into();
        self
    }

    #[must_use]
    pub fn with_entry_points(mut self, names: EntryPointNames) -> Self {
        self.entry_points = names;
        self
    }
}

/// Minimum severity written by the structured logger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogThreshold {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
    Fatal,
    Off,
}

impl LogThreshold {
    /// Parse from string (case-insensitive). Unknown values fall back to `Warn`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "all" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "fatal" => Self::Fatal,
            "off" | "none" | "disabled" => Self::Off,
            _ => Self::Warn,
        }
    }
}

/// What the C ABI does when the emulator bootstrap fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FatalPolicy {
    /// Report and terminate the process.
    #[default]
    Abort,
    /// Report and hand the failure sentinel back to the caller.
    Return,
}

impl FatalPolicy {
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "return" | "continue" | "sentinel" => Self::Return,
            _ => Self::Abort,
        }
    }
}

// Atomic caches: 0 = unresolved, otherwise discriminant + 1.
static CACHED_LOG: AtomicU8 = AtomicU8::new(0);
static CACHED_FATAL: AtomicU8 = AtomicU8::new(0);

const UNRESOLVED: u8 = 0;

fn log_to_u8(level: LogThreshold) -> u8 {
    level as u8 + 1
}

fn u8_to_log(v: u8) -> LogThreshold {
    match v {
        1 => LogThreshold::Trace,
        2 => LogThreshold::Debug,
        3 => LogThreshold::Info,
        5 => LogThreshold::Error,
        6 => LogThreshold::Fatal,
        7 => LogThreshold::Off,
        _ => LogThreshold::Warn,
    }
}

/// Get the configured log threshold (reads `EMULINK_LOG` on first call, caches thereafter).
#[must_use]
pub fn log_threshold() -> LogThreshold {
    let cached = CACHED_LOG.load(Ordering::Acquire);
    if cached != UNRESOLVED {
        return u8_to_log(cached);
    }
    let level = std::env::var(ENV_LOG)
        .map(|v| LogThreshold::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_LOG.store(log_to_u8(level), Ordering::Release);
    level
}

/// Override the log threshold for the rest of the process.
pub fn set_log_threshold(level: LogThreshold) {
    CACHED_LOG.store(log_to_u8(level), Ordering::Release);
}

/// Get the configured fatal policy (reads `EMULINK_FATAL` on first call).
#[must_use]
pub fn fatal_policy() -> FatalPolicy {
    match CACHED_FATAL.load(Ordering::Acquire) {
        1 => FatalPolicy::Abort,
        2 => FatalPolicy::Return,
        _ => {
            let policy = std::env::var(ENV_FATAL)
                .map(|v| FatalPolicy::from_str_loose(&v))
                .unwrap_or_default();
            set_fatal_policy(policy);
            policy
        }
    }
}

/// Override the fatal policy for the rest of the process.
pub fn set_fatal_policy(policy: FatalPolicy) {
    let v = match policy {
        FatalPolicy::Abort => 1,
        FatalPolicy::Return => 2,
    };
    CACHED_FATAL.store(v, Ordering::Release);
}
