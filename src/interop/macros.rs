/*!
Wrappers for `unsafe` that require a reason.

Every unsafe block, function and impl in this crate states the invariant the
caller (or the surrounding code) upholds. The reason is a plain string and
has no effect on the generated code.
*/

/**
An `unsafe { }` block with a justification.
 */
#[macro_export]
macro_rules! unsafe_block {
    ($reason:tt => $body:expr) => {{
        #[allow(unused_unsafe)]
        let __result = unsafe { $body };
        __result
    }};
}

/**
An `unsafe fn` with a precondition.
 */
#[macro_export]
macro_rules! unsafe_fn {
    ($reason:tt => $(#[$attr:meta])* $vis:vis fn $name:ident $($body:tt)*) => {
        $(#[$attr])*
        $vis unsafe fn $name $($body)*
    };
}

/**
An `unsafe impl` with a justification.
 */
#[macro_export]
macro_rules! unsafe_impl {
    ($reason:tt => impl $($body:tt)*) => {
        unsafe impl $($body)*
    };
}
