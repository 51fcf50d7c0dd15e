//! Shared-ownership pointers with custom deleters.
//!
//! Two handles with the same surface and different bookkeeping:
//!
//! - [SharedPtr] keeps one out-of-line control block per object with the raw pointer, the deleter
//!   and an owner count. Copying a handle bumps the count and never allocates.
//! - [LinkedPtr] keeps no counter. The handles sharing an object are threaded on a circular doubly
//!   linked list, and the owner count is the length of that ring.
//!
//! Both adopt raw pointers, destroy the object exactly once through a [Deleter] stored by value,
//! may be empty, and compare by address.
//!
//! | Type        | Bookkeeping            | Allocation per object | Allocation per handle | `use_count` |
//! | ----------- | ---------------------- | --------------------- | --------------------- | ----------- |
//! | `SharedPtr` | counter in a block     | 1                     | 0                     | O(1)        |
//! | `LinkedPtr` | ring of per-handle nodes | 0                   | 1                     | O(n)        |
//!
//! ## Example
//! ```
//! use shared_ring::{LinkedPtr, SharedPtr};
//!
//! fn main() {
//!     let shared = SharedPtr::new(42);
//!     let linked = LinkedPtr::new(42);
//!
//!     let shared2 = shared.clone();
//!     let linked2 = linked.clone();
//!     assert_eq!(shared.use_count(), 2);
//!     assert_eq!(linked.use_count(), 2);
//!     assert!(shared == shared2);
//!     assert!(linked == linked2);
//!
//!     // Emptiness is about owning a record, not about the address.
//!     let null: SharedPtr<i32> = unsafe { SharedPtr::from_raw(std::ptr::null_mut::<i32>()) };
//!     assert!(null.is_null());
//!     assert_eq!(null.use_count(), 1);
//!     assert_eq!(SharedPtr::<i32>::null().use_count(), 0);
//! }
//! ```
//!
//! Allocation failures of the control block or of a ring node are reported by the `try_*`
//! constructors as [AllocError]; the pointer being adopted is released first and the handle being
//! reset keeps its previous object.
#[macro_use]
mod macros;
mod error;

pub mod convert;
pub mod deleter;
pub mod linked;
pub mod refcount;
#[cfg(feature = "serde")]
mod serde;
pub mod shared;

pub use convert::AdaptDeleter;
pub use convert::Upcast;

pub use deleter::DefaultDelete;
pub use deleter::Deleter;

pub use error::AllocError;

pub use linked::LinkedPtr;

pub use shared::SharedPtr;
pub use shared::SharedPtr16;
pub use shared::SharedPtr32;
pub use shared::SharedPtr64;
pub use shared::SharedPtr8;
pub use shared::SharedPtrX;
