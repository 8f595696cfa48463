use super::Release;
use crate::{unsafe_block, unsafe_fn};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicIsize, Ordering};

/**
The heap record shared by every handle to the same resource.

`data` and `release` never change after construction, only `refs` does.
 */
pub(super) struct ControlBlock<T> {
    refs: AtomicIsize,
    data: *mut T,
    release: Release<T>,
}

impl<T> ControlBlock<T> {
    /// Allocate a block holding the first reference to `data`.
    pub(super) fn alloc(data: *mut T, release: Release<T>) -> NonNull<Self> {
        let block = Box::new(ControlBlock {
            refs: AtomicIsize::new(1),
            data,
            release,
        });

        NonNull::from(Box::leak(block))
    }

    pub(super) fn data(&self) -> *mut T {
        self.data
    }

    pub(super) fn refs(&self) -> isize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Returns the count after the increment.
    pub(super) fn retain(&self) -> isize {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the count after the decrement.
    pub(super) fn release(&self) -> isize {
        self.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    unsafe_fn!("The block came from `alloc`, its count reached zero and no handle refers to it anymore" =>
    pub(super) fn dealloc(block: NonNull<Self>) {
        drop(Box::from_raw(block.as_ptr()));
    });
}

impl<T> Drop for ControlBlock<T> {
    fn drop(&mut self) {
        unsafe_block!("The block owns `data` and this is the only call to `release`" => (self.release)(self.data))
    }
}
