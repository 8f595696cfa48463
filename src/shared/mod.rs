/*!
An intrusive, atomically reference-counted shared pointer.

A [`Shared<T>`] points at a heap allocated control block that holds the
resource pointer, the function that releases it, and a count of the handles
referring to the block. Cloning a handle bumps the count, dropping it lowers
the count, and the handle that brings the count to zero calls the release
function and frees the block.

```
use refshare::Shared;

let a = Shared::new(String::from("payload"));
assert_eq!(1, a.shares());

let mut b = Shared::empty();
assert!(!b.is_bound());

b.assign(&a);
assert_eq!(2, a.shares());
assert_eq!(a, b);

b.reset();
assert_eq!(1, a.shares());
assert_eq!("payload", a.get().unwrap());
```

Only the count is synchronized. The resource itself is handed out as `&T`
and gets no further protection.
*/

mod block;

use self::block::ControlBlock;
use crate::interop::is_null::IsNull;
use crate::{unsafe_block, unsafe_fn, unsafe_impl};
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};

/**
A function that destroys the resource behind a shared pointer.

It receives the pointer the shared pointer was built with, which may be null,
and is called exactly once. It must not unwind.
 */
pub type Release<T> = unsafe extern "C" fn(*mut T);

/**
The default release function.

Reconstructs the `Box<T>` the pointer came from and drops it. A null pointer
is ignored.

# Safety

`ptr` must be null or come from `Box::<T>::into_raw`, and must not be used
afterwards.
 */
pub unsafe extern "C" fn release_boxed<T>(ptr: *mut T) {
    if ptr.is_null() {
        return;
    }

    drop(Box::from_raw(ptr));
}

/**
A reference-counted handle to a resource.

A handle is either empty or holds one reference to a control block. The
count on a block always equals the number of live handles pointing at it.
 */
pub struct Shared<T> {
    block: Option<NonNull<ControlBlock<T>>>,
    _marker: PhantomData<ControlBlock<T>>,
}

unsafe_impl!("The count is atomic and the resource is only ever exposed as `&T`" => impl<T: Send + Sync> Send for Shared<T> {});
unsafe_impl!("The count is atomic and the resource is only ever exposed as `&T`" => impl<T: Send + Sync> Sync for Shared<T> {});

impl<T> Shared<T> {
    /// A handle that isn't bound to anything.
    pub const fn empty() -> Self {
        Shared {
            block: None,
            _marker: PhantomData,
        }
    }

    /// Move `value` to the heap and hold the first reference to it.
    pub fn new(value: T) -> Self {
        unsafe_block!("The pointer comes straight from `Box::into_raw`" => Shared::from_raw(Box::into_raw(Box::new(value))))
    }

    unsafe_fn!("The pointer is null or came from `Box::into_raw`, and nothing else owns it" =>
    /// Take ownership of a boxed pointer.
    ///
    /// The handle holds the first reference to a new control block. The
    /// pointer is released with [`release_boxed`] once the last handle goes.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::<T>::into_raw`. It must not be
    /// owned by anything else, including another shared pointer: two control
    /// blocks for the same pointer release it twice.
    pub fn from_raw(ptr: *mut T) -> Self {
        Shared::from_raw_with(ptr, release_boxed::<T>)
    });

    unsafe_fn!("Calling `release(ptr)` once is sound, and nothing else owns `ptr`" =>
    /// Take ownership of a pointer that is destroyed by `release`.
    ///
    /// # Safety
    ///
    /// Calling `release(ptr)` once, from whichever thread drops the last
    /// handle, must be sound. `ptr` must not be owned by anything else, and
    /// must stay valid for reads until it's released.
    pub fn from_raw_with(ptr: *mut T, release: Release<T>) -> Self {
        Shared {
            block: Some(ControlBlock::alloc(ptr, release)),
            _marker: PhantomData,
        }
    });

    /// The resource pointer, or null if the handle isn't bound.
    ///
    /// The pointer stays owned by the handle. Don't release it.
    pub fn data(&self) -> *mut T {
        self.block().map_or(ptr::null_mut(), |block| block.data())
    }

    /// The number of handles sharing this handle's control block.
    ///
    /// This is `0` only for a handle without a control block.
    pub fn shares(&self) -> isize {
        self.block().map_or(0, |block| block.refs())
    }

    /// Borrow the resource, or `None` if the handle isn't bound.
    pub fn get(&self) -> Option<&T> {
        unsafe_block!("The resource lives at least as long as our reference to its block" => self.data().as_ref())
    }

    /// Whether the handle points at a resource.
    pub fn is_bound(&self) -> bool {
        !self.data().is_null()
    }

    /**
    Share the control block of `other`.

    Does nothing if both handles already share a block. Otherwise our
    current reference is released first.
     */
    pub fn assign(&mut self, other: &Shared<T>) -> &mut Self {
        if self.block == other.block {
            return self;
        }

        self.release();
        self.block = other.block;
        self.retain();

        self
    }

    unsafe_fn!("Calling `release(ptr)` once is sound, and nothing else owns `ptr` unless it's already ours" =>
    /**
    Rebind the handle to a new resource.

    If `ptr` is the pointer this handle already holds nothing happens:
    the count, the control block and its release function are unchanged.
    Otherwise our current reference is released and a new control block is
    created around `ptr` with a count of one.

    # Safety

    The same requirements as [`Shared::from_raw_with`]. A pointer held by
    another, unrelated handle gets a second control block, and is released
    twice.
     */
    pub fn assign_raw(&mut self, ptr: *mut T, release: Release<T>) -> &mut Self {
        if ptr == self.data() {
            return self;
        }

        self.release();
        self.block = Some(ControlBlock::alloc(ptr, release));

        self
    });

    unsafe_fn!("The pointer is null or came from `Box::into_raw`, and nothing else owns it unless it's already ours" =>
    /// Rebind the handle to a boxed resource.
    ///
    /// # Safety
    ///
    /// The same requirements as [`Shared::from_raw`].
    pub fn assign_ptr(&mut self, ptr: *mut T) -> &mut Self {
        self.assign_raw(ptr, release_boxed::<T>)
    });

    /// Drop our reference and leave the handle empty.
    pub fn reset(&mut self) {
        self.release();
    }

    fn block(&self) -> Option<&ControlBlock<T>> {
        self.block
            .map(|block| unsafe_block!("A handle only holds blocks it has a reference to" => &*block.as_ptr()))
    }

    fn retain(&self) -> isize {
        match self.block() {
            Some(block) => block.retain(),
            None => 0,
        }
    }

    fn release(&mut self) -> isize {
        let block = match self.block.take() {
            Some(block) => block,
            None => return 0,
        };

        let refs = unsafe_block!("We still hold our reference to the block" => block.as_ref()).release();

        if refs <= 0 {
            unsafe_block!("That was the last reference" => ControlBlock::dealloc(block));
        }

        refs
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        let shared = Shared {
            block: self.block,
            _marker: PhantomData,
        };
        shared.retain();

        shared
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source);
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> Default for Shared<T> {
    fn default() -> Self {
        Shared::empty()
    }
}

impl<T> From<Box<T>> for Shared<T> {
    fn from(value: Box<T>) -> Self {
        unsafe_block!("The pointer comes straight from `Box::into_raw`" => Shared::from_raw(Box::into_raw(value)))
    }
}

impl<T> IsNull for Shared<T> {
    fn is_null(&self) -> bool {
        self.data().is_null()
    }
}

impl<T, U> PartialEq<Shared<U>> for Shared<T> {
    fn eq(&self, other: &Shared<U>) -> bool {
        self.data() as *const () == other.data() as *const ()
    }
}

impl<T> Eq for Shared<T> {}

impl<T> PartialEq<*mut T> for Shared<T> {
    fn eq(&self, other: &*mut T) -> bool {
        self.data() == *other
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Shared")
            .field("data", &self.data())
            .field("shares", &self.shares())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    struct Widget {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Widget {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn widget() -> (Widget, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));

        (
            Widget {
                drops: drops.clone(),
            },
            drops,
        )
    }

    thread_local! {
        static RELEASED: RefCell<Vec<usize>> = RefCell::new(Vec::new());
        static RELEASED_OTHER: RefCell<Vec<usize>> = RefCell::new(Vec::new());
    }

    unsafe extern "C" fn record_release(ptr: *mut u32) {
        RELEASED.with(|released| released.borrow_mut().push(ptr as usize));
        release_boxed(ptr);
    }

    unsafe extern "C" fn record_release_other(ptr: *mut u32) {
        RELEASED_OTHER.with(|released| released.borrow_mut().push(ptr as usize));
        release_boxed(ptr);
    }

    fn released() -> Vec<usize> {
        RELEASED.with(|released| released.borrow().clone())
    }

    fn released_other() -> Vec<usize> {
        RELEASED_OTHER.with(|released| released.borrow().clone())
    }

    fn boxed(value: u32) -> *mut u32 {
        Box::into_raw(Box::new(value))
    }

    #[test]
    fn widget_lifecycle() {
        let (w, drops) = widget();

        let mut h1 = Shared::new(w);
        assert_eq!(1, h1.shares());

        let h2 = h1.clone();
        assert_eq!(2, h1.shares());
        assert_eq!(2, h2.shares());

        h1 = Shared::empty();
        assert_eq!(1, h2.shares());
        assert!(h1.data().is_null());
        assert_eq!(0, h1.shares());
        assert_eq!(0, drops.load(Ordering::SeqCst));

        drop(h2);
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn shares_tracks_live_handles() {
        let (w, drops) = widget();

        let root = Shared::new(w);
        let mut family = vec![root.clone(), root.clone()];
        assert_eq!(3, root.shares());

        family.push(family[0].clone());
        for h in &family {
            assert_eq!(4, h.shares());
        }

        let mut late = Shared::empty();
        late.assign(&family[1]);
        assert_eq!(5, root.shares());

        family.truncate(1);
        assert_eq!(3, root.shares());

        late.reset();
        assert_eq!(2, root.shares());
        assert_eq!(0, late.shares());

        drop(family);
        assert_eq!(1, root.shares());
        assert_eq!(0, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn release_runs_once_whatever_the_drop_order() {
        let p = boxed(7);

        let original = unsafe { Shared::from_raw_with(p, record_release) };
        let mut handles: Vec<Option<Shared<u32>>> =
            (0..5).map(|_| Some(original.clone())).collect();
        handles.push(Some(original));

        let mut live = handles.len() as isize;
        for i in [3, 0, 5, 1, 4, 2] {
            handles[i].take();
            live -= 1;

            for h in handles.iter().flatten() {
                assert_eq!(live, h.shares());
            }
        }

        assert_eq!(vec![p as usize], released());
    }

    #[test]
    fn assigning_a_shared_block_is_a_noop() {
        let mut h = unsafe { Shared::from_raw_with(boxed(1), record_release) };
        let copy = h.clone();

        h.assign(&copy);
        assert_eq!(2, h.shares());

        h.clone_from(&copy);
        assert_eq!(2, h.shares());
        assert_eq!(h, copy);

        assert!(released().is_empty());
    }

    #[test]
    fn assign_moves_to_the_other_block() {
        let a = boxed(1);
        let b = boxed(2);

        let mut ha = unsafe { Shared::from_raw_with(a, record_release) };
        let hb = unsafe { Shared::from_raw_with(b, record_release) };

        ha.assign(&hb);
        assert_eq!(vec![a as usize], released());
        assert_eq!(2, hb.shares());
        assert_eq!(b, ha.data());
        assert_eq!(Some(&2), ha.get());
    }

    #[test]
    fn assign_raw_same_pointer_keeps_block() {
        let p = boxed(3);

        let mut h = unsafe { Shared::from_raw_with(p, record_release) };
        let copy = h.clone();

        unsafe { h.assign_raw(p, record_release_other) };
        assert_eq!(2, h.shares());
        assert_eq!(h, copy);

        drop(copy);
        drop(h);

        assert!(released_other().is_empty());
        assert_eq!(vec![p as usize], released());
    }

    #[test]
    fn assign_raw_different_pointer_starts_a_new_block() {
        let p = boxed(4);
        let q = boxed(5);

        let mut h = unsafe { Shared::from_raw_with(p, record_release) };
        unsafe { h.assign_raw(q, record_release_other) };

        assert_eq!(vec![p as usize], released());
        assert_eq!(1, h.shares());
        assert_eq!(q, h.data());

        drop(h);
        assert_eq!(vec![q as usize], released_other());
    }

    #[test]
    fn assign_raw_leaves_other_holders_alone() {
        let p = boxed(6);
        let q = boxed(7);

        let mut h = unsafe { Shared::from_raw_with(p, record_release) };
        let copy = h.clone();

        unsafe { h.assign_raw(q, record_release) };
        assert_eq!(1, copy.shares());
        assert_eq!(1, h.shares());
        assert!(released().is_empty());
    }

    #[test]
    fn assign_ptr_uses_the_default_release() {
        let (w, drops) = widget();
        let (v, v_drops) = widget();

        let mut h = Shared::new(w);
        unsafe { h.assign_ptr(Box::into_raw(Box::new(v))) };
        assert_eq!(1, drops.load(Ordering::SeqCst));

        h.reset();
        assert_eq!(1, v_drops.load(Ordering::SeqCst));
    }

    #[test]
    fn custom_release_replaces_drop() {
        let p = boxed(8);

        drop(unsafe { Shared::from_raw_with(p, record_release) });

        assert_eq!(vec![p as usize], released());
        assert!(released_other().is_empty());
    }

    #[test]
    fn null_pointer_is_counted_but_unbound() {
        let h: Shared<Widget> = unsafe { Shared::from_raw(ptr::null_mut()) };

        assert_eq!(1, h.shares());
        assert!(!h.is_bound());
        assert!(h.is_null());
        assert!(h.get().is_none());

        let copy = h.clone();
        assert_eq!(2, copy.shares());
    }

    #[test]
    fn empty_handle() {
        let mut h: Shared<u32> = Shared::default();

        assert_eq!(0, h.shares());
        assert!(h.is_null());
        assert_eq!(0, h.clone().shares());

        h.reset();
        assert_eq!(0, h.shares());
    }

    #[test]
    fn compares_by_pointer() {
        let a = Shared::new(1u32);
        let b = Shared::new(1u32);

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a, a.data());

        let none_u32: Shared<u32> = Shared::empty();
        let none_str: Shared<String> = Shared::empty();
        assert!(none_u32 == none_str);
        assert!(none_u32 == ptr::null_mut());
    }

    #[test]
    fn from_box() {
        let (w, drops) = widget();

        let h = Shared::from(Box::new(w));
        assert!(h.is_bound());

        drop(h);
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_clones_keep_an_exact_count() {
        let (w, drops) = widget();
        let h = Shared::new(w);

        crossbeam::scope(|s| {
            for _ in 0..8 {
                s.spawn(|_| {
                    let mut held = Vec::new();
                    for _ in 0..1_000 {
                        held.push(h.clone());
                    }
                    for _ in 0..500 {
                        held.pop();
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(1, h.shares());
        assert_eq!(0, drops.load(Ordering::SeqCst));

        drop(h);
        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn last_handle_can_drop_on_another_thread() {
        let (w, drops) = widget();
        let h = Shared::new(w);
        let moved = h.clone();
        drop(h);

        crossbeam::scope(|s| {
            s.spawn(move |_| drop(moved));
        })
        .unwrap();

        assert_eq!(1, drops.load(Ordering::SeqCst));
    }

    #[test]
    fn racing_last_drops_release_once() {
        const THREADS: usize = 8;

        for round in 0..200 {
            let (w, drops) = widget();
            let h = Shared::new(w);
            let copies: Vec<_> = (0..THREADS).map(|_| h.clone()).collect();
            drop(h);
            assert_eq!(THREADS as isize, copies[0].shares());

            let barrier = Barrier::new(THREADS);
            crossbeam::scope(|s| {
                for copy in copies {
                    let barrier = &barrier;
                    s.spawn(move |_| {
                        barrier.wait();
                        drop(copy);
                    });
                }
            })
            .unwrap();

            assert_eq!(1, drops.load(Ordering::SeqCst), "round {}", round);
        }
    }

    #[test]
    fn debug_shows_shares() {
        let h = Shared::new(1u8);

        assert!(format!("{:?}", h).contains("shares: 1"));
    }
}
