//! # emulink-core
//!
//! Safe, platform-independent pieces of the emulink loader: loader flag
//! constants and argument validators, runtime configuration resolved from the
//! environment, and the error taxonomy shared by the loader and ABI crates.
//!
//! No `unsafe` code is permitted at the crate level. Actual `dlopen`/`dlsym`
//! invocations and emulator calls live in the `emulink` crate.

#![deny(unsafe_code)]

pub mod config;
pub mod dlfcn;
pub mod error;

pub use config::{EmulatorConfig, EntryPointNames, FatalPolicy, LogThreshold};
pub use error::{BootstrapError, LoadError};
