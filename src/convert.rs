//! Compile-time convertibility rules shared by both pointer kinds.
//!
//! A handle of element type `U` with deleter `D` adopts a raw pointer to `T` only when
//! `T: Upcast<U>`, and the deleter it is given must be a `D` or adapt into one
//! (`D: AdaptDeleter<E>`). A [LinkedPtr](crate::LinkedPtr) joins the ring of a
//! `LinkedPtr<T, E>` under the same two bounds. Every rule is a trait bound, so an incompatible
//! combination is rejected by the type checker.
//!
//! ```compile_fail
//! use shared_ring::SharedPtr;
//!
//! // `f64` does not upcast to `i32`.
//! let raw = Box::into_raw(Box::new(1.0f64));
//! let _p: SharedPtr<i32> = unsafe { SharedPtr::from_raw(raw) };
//! ```
//!
//! ```compile_fail
//! use shared_ring::SharedPtr;
//!
//! let raw = Box::into_raw(Box::new(1i32));
//! let deleter = |p: *mut i32| drop(unsafe { Box::from_raw(p) });
//! let _good: SharedPtr<i32, _> = unsafe { SharedPtr::from_raw_with(raw, deleter) };
//!
//! // A deleter written for `u8` cannot destroy an `i32`.
//! let other = Box::into_raw(Box::new(2i32));
//! let wrong = |p: *mut u8| drop(p);
//! let _bad: SharedPtr<i32, _> = unsafe { SharedPtr::from_raw_with(other, wrong) };
//! ```
//!
//! ```compile_fail
//! use shared_ring::LinkedPtr;
//!
//! // A deleter written for `u8` cannot destroy an `i32`.
//! let raw = Box::into_raw(Box::new(1i32));
//! let deleter = |p: *mut u8| drop(p);
//! let _p: LinkedPtr<i32, _> = unsafe { LinkedPtr::from_raw_with(raw, deleter) };
//! ```
//!
//! ```compile_fail
//! use shared_ring::{upcast, LinkedPtr};
//!
//! trait Shape {}
//!
//! struct Square;
//!
//! impl Shape for Square {}
//!
//! upcast!(Square => dyn Shape);
//!
//! let square = LinkedPtr::new(Square);
//! let shape = LinkedPtr::<dyn Shape>::from_linked(&square);
//!
//! // A base view does not convert back to the concrete type.
//! let _square = LinkedPtr::<Square>::from_linked(&shape);
//! ```
//!
//! ```compile_fail
//! use shared_ring::LinkedPtr;
//!
//! let real = LinkedPtr::new(1.0f64);
//! let _same = LinkedPtr::<f64>::from_linked(&real);
//!
//! // `f64` does not upcast to `i32`.
//! let _int = LinkedPtr::<i32>::from_linked(&real);
//! ```
//!
//! ```compile_fail
//! use shared_ring::{DefaultDelete, Deleter, LinkedPtr};
//!
//! #[derive(Clone)]
//! struct Noop;
//!
//! impl Deleter<i32> for Noop {
//!     unsafe fn delete(&mut self, _ptr: *mut i32) {}
//! }
//!
//! let mut local = 1;
//! let p = unsafe { LinkedPtr::<i32, Noop>::from_raw_with(&mut local as *mut i32, Noop) };
//! let _q = LinkedPtr::<i32, Noop>::from_linked(&p);
//!
//! // `DefaultDelete` does not adapt from `Noop`.
//! let _r = LinkedPtr::<i32, DefaultDelete>::from_linked(&p);
//! ```
//!
//! ```compile_fail
//! use shared_ring::{DefaultDelete, Deleter, LinkedPtr};
//!
//! #[derive(Clone)]
//! struct Noop;
//!
//! impl Deleter<i32> for Noop {
//!     unsafe fn delete(&mut self, _ptr: *mut i32) {}
//! }
//!
//! let mut local = 1;
//! let p = unsafe { LinkedPtr::<i32, Noop>::from_raw_with(&mut local as *mut i32, Noop) };
//! let mut q = LinkedPtr::<i32, Noop>::null();
//! q.assign_from(&p);
//!
//! // `DefaultDelete` does not adapt from `Noop`.
//! let mut r = LinkedPtr::<i32, DefaultDelete>::null();
//! r.assign_from(&p);
//! ```
//!
//! ```compile_fail
//! use shared_ring::{DefaultDelete, Deleter, SharedPtr};
//!
//! struct Noop;
//!
//! impl Deleter<i32> for Noop {
//!     unsafe fn delete(&mut self, _ptr: *mut i32) {}
//! }
//!
//! let mut local = 1;
//! let _p = unsafe { SharedPtr::<i32, Noop>::from_raw_adapt(&mut local as *mut i32, Noop) };
//!
//! // `DefaultDelete` does not adapt from `Noop`.
//! let mut other = 2;
//! let _q = unsafe { SharedPtr::<i32, DefaultDelete>::from_raw_adapt(&mut other as *mut i32, Noop) };
//! ```

/// Derived-to-base pointer conversion.
///
/// `T: Upcast<T>` always holds. Conversions to trait objects are implemented with
/// [upcast!](crate::upcast).
///
/// # Safety
/// `upcast` must return a pointer to the same object, and destroying the object through the
/// returned pointer (e.g. dropping a `Box<U>` rebuilt from it) must be equivalent to destroying
/// it through the original one.
pub unsafe trait Upcast<U: ?Sized> {
    fn upcast(ptr: *mut Self) -> *mut U;
}

unsafe impl<T: ?Sized> Upcast<T> for T {
    #[inline]
    fn upcast(ptr: *mut T) -> *mut T {
        ptr
    }
}

/// Converts the deleter of a source pointer into the deleter stored by the target handle.
///
/// Every deleter adapts from itself. Families of typed deleters implement it for the concrete
/// derived-to-base pairs they support.
///
/// # Safety
/// The adapted deleter must be able to release every pointer the source deleter can, seen through
/// any [Upcast] to an element type the adapted deleter is a [Deleter](crate::Deleter) for. Handles
/// rely on this when they hand an adopted pointer, or the object of a ring they join, to the
/// adapted deleter.
///
/// Implementations must say so:
///
/// ```compile_fail
/// use shared_ring::{AdaptDeleter, DefaultDelete, Deleter, LinkedPtr};
///
/// #[derive(Clone)]
/// struct Noop;
///
/// impl Deleter<i32> for Noop {
///     unsafe fn delete(&mut self, _ptr: *mut i32) {}
/// }
///
/// // `DefaultDelete` would free a pointer that `Noop` only borrows.
/// impl AdaptDeleter<Noop> for DefaultDelete {
///     fn adapt(_source: Noop) -> Self {
///         DefaultDelete
///     }
/// }
///
/// let mut local = 1;
/// let p = unsafe { LinkedPtr::from_raw_with(&mut local as *mut i32, Noop) };
/// let _q: LinkedPtr<i32, DefaultDelete> = LinkedPtr::from_linked(&p);
/// ```
pub unsafe trait AdaptDeleter<E>: Sized {
    fn adapt(source: E) -> Self;
}

unsafe impl<D> AdaptDeleter<D> for D {
    #[inline]
    fn adapt(source: D) -> D {
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deleter::{DefaultDelete, Deleter};
    use std::cell::Cell;

    trait Named {
        fn name(&self) -> &'static str;
    }

    struct Widget;

    impl Named for Widget {
        fn name(&self) -> &'static str {
            "widget"
        }
    }

    upcast!(Widget => dyn Named);

    #[test]
    fn identity() {
        let mut v = 3u8;
        let p = &mut v as *mut u8;
        assert_eq!(<u8 as Upcast<u8>>::upcast(p), p);
    }

    #[test]
    fn to_trait_object() {
        let raw = Box::into_raw(Box::new(Widget));
        let base = <Widget as Upcast<dyn Named>>::upcast(raw);
        assert_eq!(base as *mut u8, raw as *mut u8);
        assert_eq!(unsafe { (*base).name() }, "widget");
        unsafe { DefaultDelete.delete(base) };
    }

    struct Flagging<'a>(&'a Cell<bool>);

    struct Counting<'a>(&'a Cell<bool>, u32);

    unsafe impl<'a> AdaptDeleter<Flagging<'a>> for Counting<'a> {
        fn adapt(source: Flagging<'a>) -> Self {
            Counting(source.0, 0)
        }
    }

    #[test]
    fn adapt_custom() {
        let flag = Cell::new(false);
        let counting = Counting::adapt(Flagging(&flag));
        counting.0.set(true);
        assert_eq!(counting.1, 0);
        assert!(flag.get());

        let same = <DefaultDelete as AdaptDeleter<DefaultDelete>>::adapt(DefaultDelete);
        assert_eq!(same, DefaultDelete);
    }
}
