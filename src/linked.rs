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

/// Ring header at the start of every node.
///
/// It knows nothing about the element or deleter type, so handles of different types can share a
/// ring.
struct Link {
    prev: Cell<NonNull<Link>>,
    next: Cell<NonNull<Link>>,
}

impl Link {
    fn dangling() -> Self {
        Link {
            prev: Cell::new(NonNull::dangling()),
            next: Cell::new(NonNull::dangling()),
        }
    }

    /// Turns `this` into a ring of one.
    unsafe fn make_singleton(this: NonNull<Link>) {
        let link = this.as_ref();
        link.prev.set(this);
        link.next.set(this);
    }

    /// Inserts the detached `node` right after `anchor`.
    unsafe fn insert_after(anchor: NonNull<Link>, node: NonNull<Link>) {
        let next = anchor.as_ref().next.get();
        node.as_ref().prev.set(anchor);
        node.as_ref().next.set(next);
        next.as_ref().prev.set(node);
        anchor.as_ref().next.set(node);
    }

    /// Removes `this` from its ring and leaves it as a ring of one.
    ///
    /// Returns true if `this` was the only member.
    unsafe fn unlink(this: NonNull<Link>) -> bool {
        let link = this.as_ref();
        let next = link.next.get();
        if next == this {
            assume!(link.prev.get() == this);
            return true;
        }
        let prev = link.prev.get();
        prev.as_ref().next.set(next);
        next.as_ref().prev.set(prev);
        Self::make_singleton(this);
        false
    }

    /// Counts the members of the ring containing `this`.
    unsafe fn ring_len(this: NonNull<Link>) -> usize {
        let mut len = 1;
        let mut cursor = this.as_ref().next.get();
        while cursor != this {
            len += 1;
            cursor = cursor.as_ref().next.get();
        }
        len
    }
}

#[repr(C)]
struct Node<T: ?Sized, D> {
    // NOTE Must stay the first field; nodes are linked through pointers to it.
    link: Link,
    ptr: *mut T,
    deleter: D,
}

impl<T: ?Sized, D> Node<T, D> {
    fn link(this: NonNull<Self>) -> NonNull<Link> {
        this.cast()
    }

    /// Allocates a detached node.
    fn allocate(ptr: *mut T, deleter: D) -> Result<NonNull<Self>, (D, Layout)> {
        let node = Node {
            link: Link::dangling(),
            ptr,
            deleter,
        };
        match try_allocate(node) {
            Ok(node) => {
                unsafe { Link::make_singleton(Self::link(node)) };
                Ok(node)
            }
            Err((node, layout)) => Err((node.deleter, layout)),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Node<T, D> {
    /// Allocates a singleton ring adopting `ptr`.
    ///
    /// If the allocation fails, `ptr` is released through `deleter` before returning.
    unsafe fn adopt(ptr: *mut T, deleter: D) -> Result<NonNull<Self>, Layout> {
        Self::allocate(ptr, deleter).map_err(|(mut deleter, layout)| {
            log::debug!(
                "ring node allocation of {} bytes failed, releasing {:p}",
                layout.size(),
                ptr as *const ()
            );
            deleter.delete(ptr);
            layout
        })
    }
}

/// Ring-linked pointer.
///
/// There is no shared counter. Every populated handle owns one node holding the raw pointer and its
/// own copy of the deleter, and the nodes of all handles sharing an object form a circular doubly
/// linked list. A handle leaving a ring of one destroys the object through its deleter.
///
/// Nodes are heap allocated because Rust values move; construction and copying allocate one node
/// per handle and report failures like [SharedPtr](crate::SharedPtr) does.
///
/// Rings may mix element types: a `LinkedPtr<dyn Trait>` can join the ring of a
/// `LinkedPtr<Concrete>` through [from_linked](Self::from_linked), and whichever handle is dropped
/// last destroys the object with the deleter it carries.
///
/// ```
/// use shared_ring::LinkedPtr;
///
/// let h1 = LinkedPtr::new(String::from("ring"));
/// let h2 = h1.clone();
/// assert_eq!(h1.use_count(), 2);
/// assert!(h1 == h2);
///
/// drop(h1);
/// assert_eq!(h2.use_count(), 1);
/// assert_eq!(&*h2, "ring");
/// ```
pub struct LinkedPtr<T: ?Sized, D: Deleter<T> = DefaultDelete> {
    node: Option<NonNull<Node<T, D>>>,

    // NOTE PhantomData for dropck.
    // This struct owns its node and shares ownership of the managed object.
    _phantom: PhantomData<(Node<T, D>, Box<T>)>,
}

impl<T: RefUnwindSafe + ?Sized, D: Deleter<T> + RefUnwindSafe> UnwindSafe for LinkedPtr<T, D> {}
impl<T: RefUnwindSafe + ?Sized, D: Deleter<T> + RefUnwindSafe> RefUnwindSafe for LinkedPtr<T, D> {}

impl<T: ?Sized, D: Deleter<T>> LinkedPtr<T, D> {
    fn inner(&self) -> Option<&Node<T, D>> {
        self.node.map(|node| unsafe { &*node.as_ptr() })
    }

    unsafe fn from_node(node: NonNull<Node<T, D>>) -> Self {
        Self {
            node: Some(node),
            _phantom: PhantomData,
        }
    }

    /// Creates an empty handle.
    pub const fn null() -> Self {
        Self {
            node: None,
            _phantom: PhantomData,
        }
    }

    /// Adopts `ptr` as a ring of one, destroying it through `deleter` once the last handle is gone.
    ///
    /// The pointer may be null; the handle still has a use count of 1.
    ///
    /// # Errors
    /// If the node cannot be allocated, `ptr` is released through `deleter` and [AllocError] is
    /// returned.
    ///
    /// # Safety
    /// `ptr` must be valid for reads for as long as any handle refers to it, and `deleter` (and
    /// every copy of it made when cloning) must be able to release it.
    pub unsafe fn try_from_raw_with<S>(ptr: *mut S, deleter: D) -> Result<Self, AllocError>
    where
        S: ?Sized + Upcast<T>,
    {
        let node = Node::adopt(S::upcast(ptr), deleter).map_err(|_| AllocError)?;
        Ok(Self::from_node(node))
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
        match Node::adopt(S::upcast(ptr), deleter) {
            Ok(node) => Self::from_node(node),
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

    /// Joins the ring of `other`, possibly viewing its object through a base type.
    ///
    /// The new node gets `other`'s deleter, cloned and adapted.
    ///
    /// # Errors
    /// [AllocError] if the node cannot be allocated. `other` is unaffected.
    pub fn try_from_linked<S, E>(other: &LinkedPtr<S, E>) -> Result<Self, AllocError>
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S> + Clone,
        D: AdaptDeleter<E>,
    {
        Self::join(other).map_err(|_| AllocError)
    }

    /// Joins the ring of `other`, possibly viewing its object through a base type.
    ///
    /// ```
    /// use shared_ring::{upcast, LinkedPtr};
    ///
    /// trait Animal {
    ///     fn legs(&self) -> u32;
    /// }
    ///
    /// struct Cat;
    ///
    /// impl Animal for Cat {
    ///     fn legs(&self) -> u32 {
    ///         4
    ///     }
    /// }
    ///
    /// upcast!(Cat => dyn Animal);
    ///
    /// let cat = LinkedPtr::new(Cat);
    /// let animal = LinkedPtr::<dyn Animal>::from_linked(&cat);
    /// assert_eq!(animal.legs(), 4);
    /// assert!(animal == cat);
    /// ```
    pub fn from_linked<S, E>(other: &LinkedPtr<S, E>) -> Self
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S> + Clone,
        D: AdaptDeleter<E>,
    {
        match Self::join(other) {
            Ok(this) => this,
            Err(layout) => handle_alloc_error(layout),
        }
    }

    fn join<S, E>(other: &LinkedPtr<S, E>) -> Result<Self, Layout>
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S> + Clone,
        D: AdaptDeleter<E>,
    {
        let Some(source) = other.node else {
            return Ok(Self::null());
        };
        let inner = unsafe { &*source.as_ptr() };
        let deleter = D::adapt(inner.deleter.clone());
        let node = Node::allocate(S::upcast(inner.ptr), deleter).map_err(|(_, layout)| layout)?;
        unsafe {
            Link::insert_after(Node::link(source), Node::link(node));
            Ok(Self::from_node(node))
        }
    }

    /// Number of handles in this handle's ring, 0 for an empty handle.
    ///
    /// Walks the ring.
    pub fn use_count(&self) -> usize {
        self.node
            .map_or(0, |node| unsafe { Link::ring_len(Node::link(node)) })
    }

    /// Returns true if the handle is not part of any ring.
    pub fn is_empty(&self) -> bool {
        self.node.is_none()
    }

    /// Returns true if there is no object to dereference: the handle is empty or it owns a null
    /// pointer.
    pub fn is_null(&self) -> bool {
        self.addr().is_null()
    }

    /// Address of the managed object, null for empty handles.
    pub fn addr(&self) -> *const () {
        self.inner()
            .map_or(std::ptr::null(), |node| node.ptr as *const ())
    }

    /// Returns a reference to the managed object, if there is one.
    pub fn get(&self) -> Option<&T> {
        let node = self.inner()?;
        if node.ptr.is_null() {
            None
        } else {
            unsafe { Some(&*node.ptr) }
        }
    }

    /// Returns true if both handles manage the same address.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.addr() == other.addr()
    }

    /// Leaves the ring. The object is destroyed if this was its last owner.
    pub fn reset(&mut self) {
        drop(mem::replace(self, Self::null()));
    }

    /// Replaces the managed object with `ptr`.
    ///
    /// The new node is allocated before this handle leaves its current ring, so on failure the
    /// handle keeps what it had and only `ptr` is released, through `deleter`.
    ///
    /// # Errors
    /// [AllocError] if the node cannot be allocated.
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

    /// Makes this handle join the ring of `other`.
    ///
    /// The new node is linked in before the old one is unlinked, so assigning from a handle of
    /// the same ring leaves the object and the ring size untouched.
    ///
    /// # Errors
    /// [AllocError] if the node cannot be allocated. Both handles are unaffected.
    pub fn try_assign_from<S, E>(&mut self, other: &LinkedPtr<S, E>) -> Result<(), AllocError>
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S> + Clone,
        D: AdaptDeleter<E>,
    {
        let fresh = Self::try_from_linked(other)?;
        drop(mem::replace(self, fresh));
        Ok(())
    }

    /// Infallible counterpart of [try_assign_from](Self::try_assign_from).
    pub fn assign_from<S, E>(&mut self, other: &LinkedPtr<S, E>)
    where
        S: ?Sized + Upcast<T>,
        E: Deleter<S> + Clone,
        D: AdaptDeleter<E>,
    {
        let fresh = Self::from_linked(other);
        drop(mem::replace(self, fresh));
    }

    /// Exchanges the objects managed by two handles. Rings are not touched.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.node, &mut other.node);
    }
}

impl<T: ?Sized, D: Deleter<T> + Clone> LinkedPtr<T, D> {
    /// Joins this handle's ring.
    ///
    /// # Errors
    /// [AllocError] if the node cannot be allocated.
    pub fn try_clone(&self) -> Result<Self, AllocError> {
        Self::try_from_linked(self)
    }

    /// Makes this handle join the ring of `other`.
    pub fn assign(&mut self, other: &Self) {
        self.assign_from(other)
    }
}

impl<T, D: Deleter<T>> LinkedPtr<T, D> {
    /// Raw pointer to the managed object, null for empty handles.
    pub fn as_ptr(&self) -> *mut T {
        self.inner().map_or(std::ptr::null_mut(), |node| node.ptr)
    }
}

impl<T> LinkedPtr<T, DefaultDelete> {
    /// Moves `value` to the heap and owns it as a ring of one.
    pub fn new(value: T) -> Self {
        unsafe { Self::from_raw(Box::into_raw(Box::new(value))) }
    }

    /// Moves `value` to the heap and owns it as a ring of one.
    ///
    /// # Errors
    /// [AllocError] if either allocation fails; `value` is dropped.
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        let ptr = try_allocate(value).map_err(|_| AllocError)?;
        unsafe { Self::try_from_raw(ptr.as_ptr()) }
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for LinkedPtr<T, D> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("dereferenced an empty or null LinkedPtr"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for LinkedPtr<T, D> {
    fn drop(&mut self) {
        let Some(node) = self.node.take() else {
            return;
        };
        unsafe {
            if Link::unlink(Node::link(node)) {
                let inner = &mut *node.as_ptr();
                log::trace!("last linked owner released {:p}", inner.ptr as *const ());
                inner.deleter.delete(inner.ptr);
            }
            deallocate(node);
        }
    }
}

impl<T: ?Sized, D: Deleter<T> + Clone> Clone for LinkedPtr<T, D> {
    fn clone(&self) -> LinkedPtr<T, D> {
        Self::from_linked(self)
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign(source)
    }
}

impl<T: ?Sized, D: Deleter<T>> Default for LinkedPtr<T, D> {
    fn default() -> LinkedPtr<T, D> {
        Self::null()
    }
}

impl<T, D, U, E> PartialEq<LinkedPtr<U, E>> for LinkedPtr<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
    U: ?Sized,
    E: Deleter<U>,
{
    fn eq(&self, other: &LinkedPtr<U, E>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized, D: Deleter<T>> Eq for LinkedPtr<T, D> {}

impl<T: ?Sized, D: Deleter<T>> fmt::Debug for LinkedPtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedPtr")
            .field("ptr", &self.addr())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized, D: Deleter<T>> fmt::Pointer for LinkedPtr<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

impl<T: ?Sized, D: Deleter<T>> Unpin for LinkedPtr<T, D> {}
