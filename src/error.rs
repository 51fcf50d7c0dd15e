use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

/// The `AllocError` error indicates an allocation failure when using `try_from_raw()` etc.
///
/// By the time it reaches the caller, the pointer that was being adopted has already been
/// released through its deleter and the handle involved is in its previous state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AllocError;

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

impl std::error::Error for AllocError {}

/// Moves `value` into a fresh heap allocation compatible with [Box].
///
/// On failure the value is handed back together with the layout that could not be allocated.
pub(crate) fn try_allocate<T>(value: T) -> Result<NonNull<T>, (T, Layout)> {
    let layout = Layout::new::<T>();
    if layout.size() == 0 {
        return Ok(NonNull::from(Box::leak(Box::new(value))));
    }

    let raw = unsafe { alloc::alloc(layout) } as *mut T;
    if unlikely!(raw.is_null()) {
        return Err((value, layout));
    }
    unsafe {
        raw.write(value);
        Ok(NonNull::new_unchecked(raw))
    }
}

/// Drops the value and frees an allocation made by [try_allocate].
pub(crate) unsafe fn deallocate<T>(ptr: NonNull<T>) {
    drop(Box::from_raw(ptr.as_ptr()));
}
