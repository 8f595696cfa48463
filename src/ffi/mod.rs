/*!
A C ABI for shared pointers to foreign resources.

Each `SharedHandle` is one reference to a control block around a `void*`.
Handles are created by `shared_new` or `shared_clone` and must be destroyed
with `shared_release`. A null release function means the resource is freed
with the C allocator's `free`.

Every function returns a `ShareResult`. When it isn't ok, a message can be
fetched with `shared_last_result` on the same thread.
*/

mod result;

pub use self::result::{Error, ShareResult};

use crate::interop::handle_shared::HandleShared;
use crate::interop::is_null::IsNull;
use crate::interop::out::Out;
use crate::shared::{Release, Shared};
use crate::unsafe_block;
use libc::c_void;

/// A shared pointer to a foreign resource.
pub type SharedHandle<'a> = HandleShared<'a, c_void>;

/// A function that releases a foreign resource. Null means `free`.
pub type SharedRelease = Option<Release<c_void>>;

fn ensure_not_null(arg: &impl IsNull, name: &'static str) -> Result<(), Error> {
    if arg.is_null() {
        Err(Error::ArgumentNull(name))
    } else {
        Ok(())
    }
}

fn release_or_free(release: SharedRelease) -> Release<c_void> {
    release.unwrap_or(libc::free)
}

/// Share ownership of `data`, which is destroyed by `release` once the last handle goes.
#[no_mangle]
pub unsafe extern "C" fn shared_new(
    data: *mut c_void,
    release: SharedRelease,
    mut handle: Out<SharedHandle>,
) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;

        let shared = unsafe_block!("The caller hands over ownership of `data`" => Shared::from_raw_with(data, release_or_free(release)));

        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => handle.init(HandleShared::alloc(shared)));

        Ok(())
    })
}

/// Create a new handle sharing the resource of `handle`.
#[no_mangle]
pub unsafe extern "C" fn shared_clone(
    handle: SharedHandle,
    mut cloned: Out<SharedHandle>,
) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;
        ensure_not_null(&cloned, "cloned")?;

        let shared = handle.as_ref().clone();

        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => cloned.init(HandleShared::alloc(shared)));

        Ok(())
    })
}

/// Make `handle` share the resource of `other`.
#[no_mangle]
pub unsafe extern "C" fn shared_assign(mut handle: SharedHandle, other: SharedHandle) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;
        ensure_not_null(&other, "other")?;

        // `handle` and `other` may be the same handle
        let other = other.as_ref().clone();
        handle.as_mut().assign(&other);

        Ok(())
    })
}

/// Rebind `handle` to `data`, unless it already holds `data`.
#[no_mangle]
pub unsafe extern "C" fn shared_assign_raw(
    mut handle: SharedHandle,
    data: *mut c_void,
    release: SharedRelease,
) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;

        unsafe_block!("The caller hands over ownership of `data` unless the handle already owns it" => handle.as_mut().assign_raw(data, release_or_free(release)));

        Ok(())
    })
}

/// Drop the reference held by `handle`, leaving it unbound.
#[no_mangle]
pub unsafe extern "C" fn shared_reset(mut handle: SharedHandle) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;

        handle.as_mut().reset();

        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn shared_data(handle: SharedHandle, mut data: Out<*mut c_void>) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;
        ensure_not_null(&data, "data")?;

        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => data.init(handle.as_ref().data()));

        Ok(())
    })
}

#[no_mangle]
pub unsafe extern "C" fn shared_count(handle: SharedHandle, mut count: Out<isize>) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;
        ensure_not_null(&count, "count")?;

        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => count.init(handle.as_ref().shares()));

        Ok(())
    })
}

/// Destroy `handle`. The resource is released if this was its last handle.
#[no_mangle]
pub unsafe extern "C" fn shared_release(handle: SharedHandle) -> ShareResult {
    ShareResult::catch(move || {
        ensure_not_null(&handle, "handle")?;

        drop(unsafe_block!("The caller won't use the handle again" => HandleShared::dealloc(handle)));

        Ok(())
    })
}

/**
Copy the message of the last result on this thread into `message_buf`.

`actual_message_len` receives the length of the message and `result` the
last result itself, even when the buffer is too small to hold the message.
This call doesn't replace the last result.
 */
#[no_mangle]
pub unsafe extern "C" fn shared_last_result(
    mut message_buf: Out<u8>,
    message_buf_len: usize,
    mut actual_message_len: Out<usize>,
    mut result: Out<ShareResult>,
) -> ShareResult {
    if actual_message_len.is_null() || result.is_null() {
        return ShareResult::argument_null();
    }

    ShareResult::with_last_result(|last_result| {
        let (value, msg) = last_result.unwrap_or((ShareResult::ok(), None));
        let msg = msg.unwrap_or("").as_bytes();

        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => actual_message_len.init(msg.len()));
        unsafe_block!("The out pointer is valid and not mutably aliased elsewhere" => result.init(value));

        if msg.len() > message_buf_len {
            return ShareResult::buffer_too_small();
        }

        if !msg.is_empty() {
            if message_buf.is_null() {
                return ShareResult::argument_null();
            }

            unsafe_block!("The buffer is valid for `message_buf_len` bytes and doesn't overlap the message" => message_buf.init_bytes(msg));
        }

        ShareResult::ok()
    })
}
