use std::alloc::{handle_alloc_error, Layout};
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::Deref;
use std::panic::{RefUnwindSafe, UnwindSafe};
use std::ptr::NonNull;

use crate::convert::{AdaptDeleter, Upcast};
use crate::deleter::{DefaultDelete, Deleter};
use crate::error::{deallocate, try_allocate, AllocError};
use crate::refcount::{Counter, RefCount};

/// SharedPtrX with u8 counter
pub type SharedPtr8<T, D = DefaultDelete> = SharedPtrX<T, D, u8>;
/// SharedPtrX with u16 counter
pub type SharedPtr16<T, D = DefaultDelete> = SharedPtrX<T, D, u16>;
/// SharedPtrX with u32 counter
pub type SharedPtr32<T, D = DefaultDelete> = SharedPtrX<T, D, u32>;
/// SharedPtrX with u64 counter
pub type SharedPtr64<T, D = DefaultDelete> = SharedPtrX<T, D, u64>;
/// SharedPtrX with usize counter
pub type SharedPtr<T, D = DefaultDelete> = SharedPtrX<T, D, usize>;

/// Control block shared by every handle of one object.
struct Block<T: ?Sized, D, C> {
    strong: Cell<C>,
    ptr: *mut T,
    deleter: D,
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Block<T, D, C> {
    /// Allocates a block adopting `ptr`.
    ///
    /// If the allocation fails, `ptr` is released through `deleter` before returning.
    unsafe fn allocate(ptr: *mut T, deleter: D) -> Result<NonNull<Self>, Layout> {
        let block = Block {
            strong: <Cell<C> as RefCount>::one(),
            ptr,
            deleter,
        };
        match try_allocate(block) {
            Ok(block) => Ok(block),
            Err((mut block, layout)) => {
                log::debug!(
                    "control block allocation of {} bytes failed, releasing {:p}",
                    layout.size(),
                    block.ptr as *const ()
                );
                block.deleter.delete(block.ptr);
                Err(layout)
            }
        }
    }
}

/// Shared-count pointer.
///
/// All handles of one object point at a single out-of-line control block holding the raw pointer,
/// the deleter and the owner count. The deleter runs exactly once, when the count drops to zero.
///
/// Unlike [std::rc::Rc], the handle may be empty, it adopts raw pointers produced elsewhere, and
/// destruction goes through a user supplied [Deleter].
///
/// There are aliases for simplicity.
/// - [SharedPtr]
/// - [SharedPtr8]
/// - [SharedPtr16]
/// - [SharedPtr32]
/// - [SharedPtr64]
///
/// ```
/// use shared_ring::SharedPtr;
///
/// let h1 = SharedPtr::new(42);
/// assert_eq!(h1.use_count(), 1);
///
/// let mut h2 = h1.clone();
/// assert_eq!(h1.use_count(), 2);
/// assert!(h1 == h2);
///
/// h2.reset();
/// assert_eq!(h1.use_count(), 1);
/// assert_eq!(*h1, 42);
/// ```
pub struct SharedPtrX<T: ?Sized, D: Deleter<T> = DefaultDelete, C: Counter = usize> {
    block: Option<NonNull<Block<T, D, C>>>,

    // NOTE PhantomData for dropck.
    // This struct owns the control block and, through it, the managed object.
    _phantom: PhantomData<(Block<T, D, C>, Box<T>)>,
}

impl<T: RefUnwindSafe + ?Sized, D: Deleter<T> + RefUnwindSafe, C: Counter> UnwindSafe
    for SharedPtrX<T, D, C>
{
}
impl<T: RefUnwindSafe + ?Sized, D: Deleter<T> + RefUnwindSafe, C: Counter> RefUnwindSafe
    for SharedPtrX<T, D, C>
{
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> SharedPtrX<T, D, C> {
    fn inner(&self) -> Option<&Block<T, D, C>> {
        self.block.map(|block| unsafe { &*block.as_ptr() })
    }

    unsafe fn from_block(block: NonNull<Block<T, D, C>>) -> Self {
        Self {
            block: Some(block),
            _phantom: PhantomData,
        }
    }

    /// Creates an empty handle. No allocation takes place.
    pub const fn null() -> Self {
        Self {
            block: None,
            _phantom: PhantomData,
        }
    }

    /// Adopts `ptr`, destroying it through `deleter` once the last handle is gone.
    ///
    /// The pointer may be null; the handle still owns a control block and has a use count of 1.
    ///
    /// # Errors
    /// If the control block cannot be allocated, `ptr` is released through `deleter` and
    /// [AllocError] is returned.
    ///
    /// # Safety
    /// `ptr` must be valid for reads for as long as any handle refers to it, and `deleter` must be
    /// able to release it exactly once.
    pub unsafe fn try_from_raw_with<S>(ptr: *mut S, deleter: D) -> Result<Self, AllocError>
    where
        S: ?Sized + Upcast<T>,
    {
        let block = Block::allocate(S::upcast(ptr), deleter).map_err(|_| AllocError)?;
        Ok(Self::from_block(block))
    }

    /// Like [try_from_raw_with](Self::try_from_raw_with), but a failed allocation ends in
    /// [handle_alloc_error] once `ptr` has been released.
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn from_raw_with<S>(ptr: *mut S, deleter: D) -> Self
    where
        S: ?Sized + Upcast<T>,
    {
        match Block::allocate(S::upcast(ptr), deleter) {
            Ok(block) => Self::from_block(block),
            Err(layout) => handle_alloc_error(layout),
        }
    }

    /// Adopts `ptr` with a default constructed deleter.
    ///
    /// # Errors
    /// See [try_from_raw_with](Self::try_from_raw_with).
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn try_from_raw<S>(ptr: *mut S) -> Result<Self, AllocError>
    where
        S: ?Sized + Upcast<T>,
        D: Default,
    {
        Self::try_from_raw_with(ptr, D::default())
    }

    /// Adopts `ptr` with a default constructed deleter.
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn from_raw<S>(ptr: *mut S) -> Self
    where
        S: ?Sized + Upcast<T>,
        D: Default,
    {
        Self::from_raw_with(ptr, D::default())
    }

    /// Adopts `ptr` together with a deleter written for its own type, adapted into `D`.
    ///
    /// This is how a base-typed handle takes over a derived pointer and the derived deleter
    /// that came with it.
    ///
    /// # Errors
    /// See [try_from_raw_with](Self::try_from_raw_with). The pointer is released through the
    /// adapted deleter.
    ///
    /// # Safety
    /// `ptr` must be valid for reads for as long as any handle refers to it, and `deleter` must be
    /// able to release it.
    pub unsafe fn try_from_raw_adapt<S, E>(ptr: *mut S, deleter: E) -> Result<Self, AllocError>
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S>,
        D: AdaptDeleter<E>,
    {
        Self::try_from_raw_with(ptr, D::adapt(deleter))
    }

    /// Infallible counterpart of [try_from_raw_adapt](Self::try_from_raw_adapt).
    ///
    /// # Safety
    /// See [try_from_raw_adapt](Self::try_from_raw_adapt).
    pub unsafe fn from_raw_adapt<S, E>(ptr: *mut S, deleter: E) -> Self
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S>,
        D: AdaptDeleter<E>,
    {
        Self::from_raw_with(ptr, D::adapt(deleter))
    }

    /// Number of handles sharing the object, 0 for an empty handle.
    pub fn use_count(&self) -> usize {
        self.inner().map_or(0, |block| block.strong.count())
    }

    /// Returns true if the handle owns no control block.
    pub fn is_empty(&self) -> bool {
        self.block.is_none()
    }

    /// Returns true if there is no object to dereference: the handle is empty or it owns a null
    /// pointer.
    pub fn is_null(&self) -> bool {
        self.addr().is_null()
    }

    /// Address of the managed object, null for empty handles.
    pub fn addr(&self) -> *const () {
        self.inner()
            .map_or(std::ptr::null(), |block| block.ptr as *const ())
    }

    /// Returns a reference to the managed object, if there is one.
    pub fn get(&self) -> Option<&T> {
        let block = self.inner()?;
        if block.ptr.is_null() {
            None
        } else {
            unsafe { Some(&*block.ptr) }
        }
    }

    /// Returns true if both handles manage the same address.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.addr() == other.addr()
    }

    /// Releases this handle's share. The object is destroyed if this was its last owner.
    pub fn reset(&mut self) {
        drop(mem::replace(self, Self::null()));
    }

    /// Replaces the managed object with `ptr`.
    ///
    /// The new control block is allocated before the current object is released, so on failure
    /// the handle keeps what it had and only `ptr` is released, through `deleter`.
    ///
    /// # Errors
    /// [AllocError] if the control block cannot be allocated.
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn try_reset_raw_with<S>(&mut self, ptr: *mut S, deleter: D) -> Result<(), AllocError>
    where
        S: ?Sized + Upcast<T>,
    {
        let fresh = Self::try_from_raw_with(ptr, deleter)?;
        drop(mem::replace(self, fresh));
        Ok(())
    }

    /// Infallible counterpart of [try_reset_raw_with](Self::try_reset_raw_with).
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn reset_raw_with<S>(&mut self, ptr: *mut S, deleter: D)
    where
        S: ?Sized + Upcast<T>,
    {
        let fresh = Self::from_raw_with(ptr, deleter);
        drop(mem::replace(self, fresh));
    }

    /// Replaces the managed object with `ptr` and a default constructed deleter.
    ///
    /// # Errors
    /// See [try_reset_raw_with](Self::try_reset_raw_with).
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn try_reset_raw<S>(&mut self, ptr: *mut S) -> Result<(), AllocError>
    where
        S: ?Sized + Upcast<T>,
        D: Default,
    {
        self.try_reset_raw_with(ptr, D::default())
    }

    /// Replaces the managed object with `ptr` and a default constructed deleter.
    ///
    /// # Safety
    /// See [try_from_raw_with](Self::try_from_raw_with).
    pub unsafe fn reset_raw<S>(&mut self, ptr: *mut S)
    where
        S: ?Sized + Upcast<T>,
        D: Default,
    {
        self.reset_raw_with(ptr, D::default())
    }

    /// Makes this handle share `other`'s object. Assigning a handle of the same group is a no-op.
    pub fn assign(&mut self, other: &Self) {
        if self.block == other.block {
            return;
        }
        drop(mem::replace(self, other.clone()));
    }

    /// Exchanges the objects managed by two handles.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.block, &mut other.block);
    }
}

impl<T, D: Deleter<T>, C: Counter> SharedPtrX<T, D, C> {
    /// Raw pointer to the managed object, null for empty handles.
    pub fn as_ptr(&self) -> *mut T {
        self.inner().map_or(std::ptr::null_mut(), |block| block.ptr)
    }
}

impl<T, C: Counter> SharedPtrX<T, DefaultDelete, C> {
    /// Moves `value` to the heap and shares it.
    pub fn new(value: T) -> Self {
        unsafe { Self::from_raw(Box::into_raw(Box::new(value))) }
    }

    /// Moves `value` to the heap and shares it.
    ///
    /// # Errors
    /// [AllocError] if either allocation fails; `value` is dropped.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let ptr = try_allocate(value).map_err(|_| AllocError)?;
        unsafe { Self::try_from_raw(ptr.as_ptr()) }
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Deref for SharedPtrX<T, D, C> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty or null SharedPtr"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Drop for SharedPtrX<T, D, C> {
    fn drop(&mut self) {
        let Some(block) = self.block.take() else {
            return;
        };
        unsafe {
            let inner = &mut *block.as_ptr();
            if <Cell<C> as RefCount>::is_one(&inner.strong.fetch_dec()) {
                log::trace!("last shared owner released {:p}", inner.ptr as *const ());
                inner.deleter.delete(inner.ptr);
                deallocate(block);
            }
        }
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Clone for SharedPtrX<T, D, C> {
    fn clone(&self) -> SharedPtrX<T, D, C> {
        if let Some(block) = self.inner() {
            block.strong.fetch_inc();
        }
        Self {
            block: self.block,
            _phantom: PhantomData,
        }
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source)
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Default for SharedPtrX<T, D, C> {
    fn default() -> SharedPtrX<T, D, C> {
        Self::null()
    }
}

impl<T, D, C, U, E, K> PartialEq<SharedPtrX<U, E, K>> for SharedPtrX<T, D, C>
where
    T: ?Sized,
    D: Deleter<T>,
    C: Counter,
    U: ?Sized,
    E: Deleter<U>,
    K: Counter,
{
    fn eq(&self, other: &SharedPtrX<U, E, K>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Eq for SharedPtrX<T, D, C> {}

impl<T: ?Sized, D: Deleter<T>, C: Counter> fmt::Debug for SharedPtrX<T, D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedPtr")
            .field("ptr", &self.addr())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> fmt::Pointer for SharedPtrX<T, D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T: ?Sized, D: Deleter<T>, C: Counter> Unpin for SharedPtrX<T, D, C> {}
