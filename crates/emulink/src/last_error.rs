//! Thread-local last loader error.
//!
//! Both backends record their failure message here so [`crate::error`] can
//! report it even when the platform error state was consumed while building
//! the returned [`LoadError`](emulink_core::LoadError), or was never set
//! because the emulator produced the failure.

use std::cell::RefCell;

std::thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Set the thread-local last error message.
pub(crate) fn record(message: impl Into<String>) {
    let message = message.into();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Take the thread-local last error message, clearing it.
pub(crate) fn take() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow_mut().take())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_slot() {
        record("first");
        record("second");
        assert_eq!(take().as_deref(), Some("second"));
        assert_eq!(take(), None);
    }

    #[test]
    fn slot_is_per_thread() {
        record("main thread");
        let other = std::thread::spawn(take).join().unwrap();
        assert_eq!(other, None);
        assert_eq!(take().as_deref(), Some("main thread"));
    }
}
