//! Call guards for the loader boundary.
//!
//! Two shapes: a precondition check that rejects bad arguments before any
//! loader is touched, and a panic barrier that turns an unwinding backend
//! into the operation's failure value. Both leave a structured log record.

use std::panic::{AssertUnwindSafe, catch_unwind};

use emulink_core::LoadError;

use crate::structured_log::{self, LogLevel, Outcome};

/// Returns `ok`, logging a `precondition_failed` record when it is `false`.
pub fn precondition(ok: bool, op: &'static str, what: &'static str) -> bool {
    if !ok {
        structured_log::emit(
            structured_log::event(LogLevel::Warn, "precondition_failed")
                .with_op(op)
                .with_outcome(Outcome::Rejected)
                .with_details(serde_json::json!({ "check": what })),
        );
    }
    ok
}

/// Run `f`, converting a panic into [`LoadError::Panicked`].
pub fn catch<T, F>(op: &'static str, f: F) -> Result<T, LoadError>
where
    F: FnOnce() -> Result<T, LoadError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            structured_log::emit(
                structured_log::event(LogLevel::Error, "panic_caught")
                    .with_op(op)
                    .with_outcome(Outcome::Failed)
                    .with_details(serde_json::json!({ "message": panic_message(&*payload) })),
            );
            Err(LoadError::Panicked { op })
        }
    }
}

/// Run `f`, substituting `None` if it panics.
pub fn catch_or_none<T, F>(op: &'static str, f: F) -> Option<T>
where
    F: FnOnce() -> Option<T>,
{
    catch(op, || Ok(f())).ok().flatten()
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
