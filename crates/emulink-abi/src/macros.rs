//! Helper macros for ABI function generation.
//!
//! Provides the `abi_fn!` macro that generates `#[unsafe(no_mangle)] pub unsafe extern "C" fn`
//! wrappers behind a panic barrier.

/// Generate an ABI-compatible extern "C" function whose body runs under
/// `catch_unwind`. A panic in the body is logged and the `fallback`
/// expression is returned instead of unwinding into C.
///
/// # Usage
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the function.
///     fn my_func(arg1: Type1, arg2: Type2) -> ReturnType = fallback_expr;
///     {
///         // implementation body
///     }
/// }
/// ```
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty = $fallback:expr;
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            let result = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(
                || -> $ret { $body },
            ));
            match result {
                Ok(value) => value,
                Err(_) => {
                    emulink::structured_log::emit(
                        emulink::structured_log::event(
                            emulink::structured_log::LogLevel::Error,
                            "panic_caught",
                        )
                        .with_op(stringify!($name)),
                    );
                    $fallback
                }
            }
        }
    };
}

#[allow(unused_imports)]
pub(crate) use abi_fn;
