// All extern "C" ABI exports accept raw pointers from C callers and check
// them at runtime, so per-function safety docs would be redundant boilerplate.
#![allow(clippy::missing_safety_doc)]
//! # emulink-abi
//!
//! C ABI boundary for emulink, for hosts written in C or C++.
//!
//! Keeps the flag-carrying signatures hosts already use:
//!
//! ```text
//! void*       emulink_lib_open(const char* filename, bool global, bool use_emulator);
//! bool        emulink_lib_close(void* lib);
//! void*       emulink_lib_symbol(void* lib, const char* symbol, bool use_emulator);
//! const char* emulink_lib_error(const char* filename, bool use_emulator);
//! ```
//!
//! Failures come back as null/false; `emulink_lib_error` describes the most
//! recent one on the calling thread. Handles are opaque: they wrap the
//! backend-tagged [`emulink::LibHandle`], so `symbol` and `close` always reach
//! the backend that opened the library, whatever flag the caller passes.
//!
//! An emulator bootstrap failure aborts the process after reporting it,
//! unless `EMULINK_FATAL=return` is set, in which case it is returned as a
//! null handle like any other failure.

#[macro_use]
mod macros;

pub mod lib_abi;
