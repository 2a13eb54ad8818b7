//! Error taxonomy for loader operations.

use std::path::PathBuf;

use thiserror::Error;

/// Unrecoverable failure while bringing up the emulator runtime.
///
/// Once returned, the runtime that produced it stays failed: later emulator
/// operations report the same error and never retry the bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    #[error("error loading emulator runtime {path}: {reason}")]
    ImageNotFound { path: PathBuf, reason: String },
    #[error("error getting symbol \"{name}\" from emulator runtime: {reason}")]
    MissingEntryPoint { name: String, reason: String },
    #[error("error initializing emulator runtime: Initialize returned {code}")]
    InitializeFailed { code: i32 },
    #[error("emulator runtime bootstrap panicked")]
    Panicked,
}

/// Failure of a single open/close/symbol operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("library path is empty")]
    EmptyPath,
    #[error("library path contains an interior NUL: {path}")]
    InvalidPath { path: String },
    #[error("symbol name is empty")]
    EmptySymbol,
    #[error("symbol name contains an interior NUL: {name}")]
    InvalidSymbol { name: String },
    #[error("{message}")]
    Native { message: String },
    #[error("symbol not found: {name}")]
    SymbolNotFound { name: String },
    #[error("emulator runtime failed to load {path}")]
    EmulatorLoad { path: String },
    #[error("emulator runtime is not initialized; open a library through it first")]
    EmulatorNotInitialized,
    #[error("fatal: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("{op}: panic caught at loader boundary")]
    Panicked { op: &'static str },
}

impl LoadError {
    /// Returns `true` for errors the host must not continue past.
    ///
    /// Only emulator bootstrap failures qualify; every other error is local to
    /// the operation that produced it.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Bootstrap(_))
    }

    /// Returns `true` for argument validation failures that never reached a loader.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::EmptyPath | Self::InvalidPath { .. } | Self::EmptySymbol | Self::InvalidSymbol { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_bootstrap_errors_are_fatal() {
        let fatal = LoadError::from(BootstrapError::InitializeFailed { code: 3 });
        assert!(fatal.is_fatal());
        assert!(!LoadError::EmptyPath.is_fatal());
        assert!(!LoadError::EmulatorNotInitialized.is_fatal());
        assert!(
            !LoadError::Native {
                message: "nope".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn precondition_classification() {
        assert!(LoadError::EmptyPath.is_precondition());
        assert!(LoadError::EmptySymbol.is_precondition());
        assert!(!LoadError::SymbolNotFound { name: "x".into() }.is_precondition());
    }

    #[test]
    fn bootstrap_messages_name_the_entry_point() {
        let err = BootstrapError::MissingEntryPoint {
            name: "RunX64Function".into(),
            reason: "undefined symbol".into(),
        };
        assert_eq!(
            err.to_string(),
            "error getting symbol \"RunX64Function\" from emulator runtime: undefined symbol"
        );
        let err = LoadError::from(BootstrapError::InitializeFailed { code: -1 });
        assert_eq!(
            err.to_string(),
            "fatal: error initializing emulator runtime: Initialize returned -1"
        );
    }
}
