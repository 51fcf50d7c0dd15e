//! Destruction strategies.
//!
//! A handle stores its deleter by value next to the managed pointer and calls it exactly once,
//! when the last owner of the object goes away.

/// Releases the object behind a raw pointer.
pub trait Deleter<T: ?Sized> {
    /// Destroys the object at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be a pointer the deleter knows how to release (for [DefaultDelete], a pointer
    /// obtained from [Box::into_raw] or null), and `delete` must be called at most once for it.
    unsafe fn delete(&mut self, ptr: *mut T);
}

/// Drops the object through [Box].
///
/// A null pointer is ignored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(&mut self, ptr: *mut T) {
        if !ptr.is_null() {
            drop(Box::from_raw(ptr));
        }
    }
}

impl<T: ?Sized, F: FnMut(*mut T)> Deleter<T> for F {
    unsafe fn delete(&mut self, ptr: *mut T) {
        self(ptr)
    }
}
