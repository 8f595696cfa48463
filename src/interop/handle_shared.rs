/*
The handle here is an owned, boxed `Shared<T>` that a foreign caller holds
as an opaque pointer.

Each handle is one reference to the underlying control block. Copying the
raw handle pointer on the foreign side does not add a reference; use
`shared_clone` for that. The caller is expected to release every handle
exactly once and not to use it afterwards.
*/

use crate::interop::is_null::IsNull;
use crate::shared::Shared;
use std::marker::PhantomData;
use std::panic::{RefUnwindSafe, UnwindSafe};

/**
A boxed shared pointer passed across the FFI boundary.

The interior value can be treated like `&mut Shared<T>` by the single
caller that owns this handle. Different handles to the same control block
may be used from different threads concurrently.

Consumers must ensure a handle is not used again after it has been deallocated.
 */
#[repr(transparent)]
pub struct HandleShared<'a, T>(pub(crate) *mut Shared<T>, pub(crate) PhantomData<&'a mut Shared<T>>);

unsafe_impl!("The handle is semantically `Box<Shared<T>>`" => impl<'a, T> Send for HandleShared<'a, T> where Shared<T>: Send {});
unsafe_impl!("The handle is semantically `Box<Shared<T>>`" => impl<'a, T> Sync for HandleShared<'a, T> where Shared<T>: Sync {});

impl<'a, T: RefUnwindSafe> UnwindSafe for HandleShared<'a, T> {}

impl<'a, T> HandleShared<'a, T>
where
    HandleShared<'a, T>: Send + Sync,
{
    pub fn alloc(shared: Shared<T>) -> Self
    where
        T: 'static,
    {
        let v = Box::new(shared);
        let handle = HandleShared(Box::into_raw(v), PhantomData);

        trace!("allocated shared handle {:p}", handle.0);

        handle
    }

    pub fn as_ref(&self) -> &Shared<T> {
        unsafe_block!("We own the interior value" => &*self.0)
    }

    pub fn as_mut(&mut self) -> &mut Shared<T> {
        unsafe_block!("We own the interior value and the caller doesn't alias the handle" => &mut *self.0)
    }

    unsafe_fn!("There are no other live references and the handle won't be used again" =>
    pub fn dealloc(handle: Self) -> Shared<T> {
        trace!("deallocating shared handle {:p}", handle.0);

        let v = Box::from_raw(handle.0);
        *v
    });
}

impl<'a, T> IsNull for HandleShared<'a, T> {
    fn is_null(&self) -> bool {
        self.0.is_null()
    }
}
