macro_rules! assume {
    ($cond:expr) => {
        if cfg!(debug_assertions) {
            debug_assert!($cond);
        } else if !$cond {
            unsafe {
                std::hint::unreachable_unchecked();
            }
        }
    };
}

// TODO
// Use std::intrinsics::unlikely once it is stable.
macro_rules! unlikely {
    ($cond:expr) => {
        $cond
    };
}

/// Implements [Upcast](crate::Upcast) from concrete types to a trait object.
///
/// ```
/// use shared_ring::{upcast, LinkedPtr};
///
/// trait Shape {
///     fn area(&self) -> u32;
/// }
///
/// struct Square(u32);
///
/// impl Shape for Square {
///     fn area(&self) -> u32 {
///         self.0 * self.0
///     }
/// }
///
/// upcast!(Square => dyn Shape);
///
/// let square = LinkedPtr::new(Square(3));
/// let shape = LinkedPtr::<dyn Shape>::from_linked(&square);
/// assert_eq!(shape.area(), 9);
/// assert_eq!(shape.use_count(), 2);
/// ```
#[macro_export]
macro_rules! upcast {
    ($($from:ty),+ => $to:ty) => {
        $(
            unsafe impl $crate::Upcast<$to> for $from {
                #[inline]
                fn upcast(ptr: *mut Self) -> *mut $to {
                    ptr as *mut $to
                }
            }
        )+
    };
}
