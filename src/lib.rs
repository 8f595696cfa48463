/*!
Reference-counted shared ownership of raw resources.

[`Shared<T>`] holds a resource pointer together with the function that
releases it. Handles can be cloned, reassigned and sent between threads; the
last one to go releases the resource. The [`ffi`] module exposes the same
handles to C callers.
*/

#[macro_use]
extern crate log;

pub mod interop;

pub mod ffi;
pub mod shared;

pub use crate::shared::{release_boxed, Release, Shared};
