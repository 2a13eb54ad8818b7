//! Dynamic loading: backend selection, symbol visibility and argument validators.
//!
//! Pure logic only. The loader crate maps these onto `dlopen` flags or
//! `LoadLibraryA` and performs the actual calls.

use std::ffi::CString;

use crate::error::LoadError;

/// Which loader services an operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// The operating system loader (`dlopen`/`dlsym`, `LoadLibraryA`/`GetProcAddress`).
    #[default]
    Native,
    /// The binary-translation emulator runtime.
    Emulator,
}

impl Backend {
    /// Map the legacy `use_emulator` flag onto a backend.
    #[must_use]
    pub const fn from_flag(use_emulator: bool) -> Self {
        if use_emulator {
            Self::Emulator
        } else {
            Self::Native
        }
    }

    #[must_use]
    pub const fn is_emulated(self) -> bool {
        matches!(self, Self::Emulator)
    }

    /// Stable lowercase name used in structured logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Emulator => "emulator",
        }
    }
}

/// Symbol visibility requested from the native loader.
///
/// Ignored by the emulator backend and by Windows, which has no equivalent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Symbols are only available through the returned handle (`RTLD_LOCAL`).
    #[default]
    Local,
    /// Symbols join the process-global namespace (`RTLD_GLOBAL`).
    Global,
}

impl Visibility {
    #[must_use]
    pub const fn from_flag(global: bool) -> Self {
        if global { Self::Global } else { Self::Local }
    }

    #[must_use]
    pub const fn is_global(self) -> bool {
        matches!(self, Self::Global)
    }
}

/// Returns `true` if `path` is usable as a library path.
///
/// Must be non-empty and must not contain an interior NUL.
#[inline]
#[must_use]
pub fn valid_path(path: &str) -> bool {
    !path.is_empty() && !path.as_bytes().contains(&0)
}

/// Returns `true` if `name` is usable as a symbol name.
#[inline]
#[must_use]
pub fn valid_symbol(name: &str) -> bool {
    !name.is_empty() && !name.as_bytes().contains(&0)
}

/// Convert a library path into the NUL-terminated form the loaders expect.
pub fn path_to_cstring(path: &str) -> Result<CString, LoadError> {
    if path.is_empty() {
        return Err(LoadError::EmptyPath);
    }
    CString::new(path).map_err(|_| LoadError::InvalidPath {
        path: path.replace('\0', "\\0"),
    })
}

/// Convert a symbol name into the NUL-terminated form the loaders expect.
pub fn symbol_to_cstring(name: &str) -> Result<CString, LoadError> {
    if name.is_empty() {
        return Err(LoadError::EmptySymbol);
    }
    CString::new(name).map_err(|_| LoadError::InvalidSymbol {
        name: name.replace('\0', "\\0"),
    })
}

/// Error message strings recorded when the platform gives no diagnostic.
pub const ERR_NOT_FOUND: &str = "shared object not found";
pub const ERR_SYMBOL_NOT_FOUND: &str = "undefined symbol";
pub const ERR_CLOSE_FAILED: &str = "failed to unload shared object";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_from_flag() {
        assert_eq!(Backend::from_flag(false), Backend::Native);
        assert_eq!(Backend::from_flag(true), Backend::Emulator);
        assert!(Backend::Emulator.is_emulated());
        assert!(!Backend::default().is_emulated());
        assert_eq!(Backend::Emulator.as_str(), "emulator");
    }

    #[test]
    fn visibility_from_flag() {
        assert!(Visibility::from_flag(true).is_global());
        assert_eq!(Visibility::from_flag(false), Visibility::Local);
    }

    #[test]
    fn test_valid_path() {
        assert!(valid_path("libm.so.6"));
        assert!(valid_path("/usr/lib/libfoo.so"));
        assert!(!valid_path(""));
        assert!(!valid_path("lib\0m.so"));
    }

    #[test]
    fn test_valid_symbol() {
        assert!(valid_symbol("cos"));
        assert!(!valid_symbol(""));
        assert!(!valid_symbol("c\0s"));
    }

    #[test]
    fn cstring_conversion_rejects_bad_input() {
        assert_eq!(path_to_cstring(""), Err(LoadError::EmptyPath));
        assert!(matches!(
            path_to_cstring("a\0b"),
            Err(LoadError::InvalidPath { .. })
        ));
        assert_eq!(symbol_to_cstring(""), Err(LoadError::EmptySymbol));
        assert_eq!(
            symbol_to_cstring("cos").unwrap().as_bytes_with_nul(),
            b"cos\0"
        );
    }
}
