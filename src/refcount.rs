use std::cell::Cell;

use num::{CheckedAdd, ToPrimitive, Unsigned};

/// Integer types usable as the owner count of a shared-count pointer.
pub trait Counter: Copy + CheckedAdd + Unsigned + ToPrimitive {}

impl Counter for u8 {}
impl Counter for u16 {}
impl Counter for u32 {}
impl Counter for u64 {}
impl Counter for usize {}

/// Trait for refcount
pub trait RefCount {
    /// Type of count
    type Value;

    /// Creates a new RefCount object.
    ///
    /// The object is initialized as "one".
    fn one() -> Self;

    /// Checks whether a value equals to one.
    fn is_one(val: &Self::Value) -> bool;

    /// Gets a current value.
    fn load(&self) -> Self::Value;

    /// Gets a current value as `usize`.
    fn count(&self) -> usize;

    /// Increments its value and returns previous value.
    fn fetch_inc(&self) -> Self::Value;

    /// Decrements its value and returns previous value.
    fn fetch_dec(&self) -> Self::Value;
}

/// Single-threaded refcount.
impl<C: Counter> RefCount for Cell<C> {
    type Value = C;

    fn one() -> Self {
        let one = Self::new(C::one());
        debug_assert!(Self::is_one(&one.load()));
        one
    }

    fn is_one(val: &Self::Value) -> bool {
        val.is_one()
    }

    fn load(&self) -> Self::Value {
        self.get()
    }

    fn count(&self) -> usize {
        // Every counter type fits in usize on 64-bit targets; saturate elsewhere.
        self.get().to_usize().unwrap_or(usize::MAX)
    }

    fn fetch_inc(&self) -> Self::Value {
        let current = self.load();
        assume!(!current.is_zero());
        match current.checked_add(&C::one()) {
            Some(c) => {
                self.set(c);
                current
            }
            None => std::process::abort(),
        }
    }

    fn fetch_dec(&self) -> Self::Value {
        let current = self.load();
        assume!(!current.is_zero());
        self.set(current - C::one());
        current
    }
}
