//! Allocation accounting and exhaustive allocation failure injection.
//!
//! Every allocation made on a test thread while it is armed is counted, and the k-th one can be
//! made to fail. A scenario is rerun with k = 0, 1, 2, ... until it completes without hitting an
//! injected failure, so each allocation point is failed once.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::rc::Rc;

use shared_ring::{AllocError, DefaultDelete, Deleter};

struct FaultInjecting;

thread_local! {
    static ARMED: Cell<bool> = const { Cell::new(false) };
    static ALLOCS: Cell<usize> = const { Cell::new(0) };
    static DEALLOCS: Cell<usize> = const { Cell::new(0) };
    static FAIL_AT: Cell<Option<usize>> = const { Cell::new(None) };
    static INJECTED: Cell<bool> = const { Cell::new(false) };
}

fn armed_now() -> bool {
    ARMED.try_with(Cell::get).unwrap_or(false)
}

unsafe impl GlobalAlloc for FaultInjecting {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if armed_now() {
            let index = ALLOCS.with(|c| c.replace(c.get() + 1));
            if FAIL_AT.with(Cell::get) == Some(index) {
                INJECTED.with(|c| c.set(true));
                return std::ptr::null_mut();
            }
        }
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if armed_now() {
            DEALLOCS.with(|c| c.set(c.get() + 1));
        }
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: FaultInjecting = FaultInjecting;

/// Runs `f` with allocation counting and injection enabled on this thread.
fn armed<R>(f: impl FnOnce() -> R) -> R {
    ARMED.with(|c| c.set(true));
    let result = f();
    ARMED.with(|c| c.set(false));
    result
}

/// Counts the allocations and deallocations made by `f`.
fn count_allocations(f: impl FnOnce()) -> (usize, usize) {
    ALLOCS.with(|c| c.set(0));
    DEALLOCS.with(|c| c.set(0));
    armed(f);
    (ALLOCS.with(Cell::get), DEALLOCS.with(Cell::get))
}

/// Reruns `scenario`, failing one more allocation each time, until a run sees no failure.
///
/// The scenario must report an injected failure as `Err` and succeed otherwise.
/// Returns the number of runs.
fn faulty_run(mut scenario: impl FnMut() -> Result<(), AllocError>) -> usize {
    let mut fail_at = 0;
    loop {
        ALLOCS.with(|c| c.set(0));
        INJECTED.with(|c| c.set(false));
        FAIL_AT.with(|c| c.set(Some(fail_at)));

        let result = scenario();

        FAIL_AT.with(|c| c.set(None));
        let injected = INJECTED.with(Cell::get);
        assert_eq!(result.is_err(), injected, "failure at allocation {fail_at}");
        if !injected {
            return fail_at + 1;
        }
        fail_at += 1;
    }
}

struct Tracker {
    value: i32,
    deleted: Rc<Cell<bool>>,
}

impl Drop for Tracker {
    fn drop(&mut self) {
        assert!(!self.deleted.get(), "destroyed twice");
        self.deleted.set(true);
    }
}

fn tracker(value: i32) -> (*mut Tracker, Rc<Cell<bool>>) {
    let deleted = Rc::new(Cell::new(false));
    let raw = Box::into_raw(Box::new(Tracker {
        value,
        deleted: deleted.clone(),
    }));
    (raw, deleted)
}

#[derive(Clone)]
struct TrackingDelete(Rc<Cell<bool>>);

impl Deleter<i32> for TrackingDelete {
    unsafe fn delete(&mut self, ptr: *mut i32) {
        self.0.set(true);
        DefaultDelete.delete(ptr)
    }
}

fn boxed(value: i32) -> (*mut i32, Rc<Cell<bool>>) {
    (Box::into_raw(Box::new(value)), Rc::new(Cell::new(false)))
}

macro_rules! common_fault_tests {
    ($name:ident, $ptr:ident) => {
        mod $name {
            use super::*;
            use shared_ring::$ptr;

            #[test]
            fn pointer_ctor() {
                let runs = faulty_run(|| {
                    let (raw, deleted) = tracker(1);
                    match armed(|| unsafe { $ptr::<Tracker>::try_from_raw(raw) }) {
                        Ok(p) => {
                            assert_eq!(p.use_count(), 1);
                            assert_eq!(p.value, 1);
                            drop(p);
                            assert!(deleted.get());
                            Ok(())
                        }
                        Err(e) => {
                            assert!(deleted.get());
                            Err(e)
                        }
                    }
                });
                assert_eq!(runs, 2);
            }

            #[test]
            fn pointer_ctor_with_custom_deleter() {
                faulty_run(|| {
                    let (raw, deleted) = boxed(42);
                    let deleter = TrackingDelete(deleted.clone());
                    match armed(|| unsafe { $ptr::<i32, TrackingDelete>::try_from_raw_with(raw, deleter) }) {
                        Ok(p) => {
                            assert_eq!(*p, 42);
                            assert!(!deleted.get());
                            drop(p);
                            assert!(deleted.get());
                            Ok(())
                        }
                        Err(e) => {
                            assert!(deleted.get());
                            Err(e)
                        }
                    }
                });
            }

            #[test]
            fn reset_ptr() {
                faulty_run(|| {
                    let (ptr1, deleted1) = tracker(1);
                    let (ptr2, deleted2) = tracker(2);
                    let mut sp = unsafe { $ptr::<Tracker>::from_raw(ptr1) };
                    let result = armed(|| unsafe { sp.try_reset_raw(ptr2) });
                    if result.is_err() {
                        assert!(deleted2.get());
                        assert!(!deleted1.get());
                        assert_eq!(sp.as_ptr(), ptr1);
                        assert_eq!(sp.use_count(), 1);
                    } else {
                        assert!(deleted1.get());
                        assert!(!deleted2.get());
                        assert_eq!(sp.as_ptr(), ptr2);
                    }
                    result
                });
            }

            #[test]
            fn reset_ptr_with_custom_deleter() {
                faulty_run(|| {
                    let (ptr1, deleted1) = boxed(42);
                    let (ptr2, deleted2) = boxed(43);
                    let mut sp = unsafe {
                        $ptr::<i32, TrackingDelete>::from_raw_with(ptr1, TrackingDelete(deleted1.clone()))
                    };
                    let deleter = TrackingDelete(deleted2.clone());
                    let result = armed(|| unsafe { sp.try_reset_raw_with(ptr2, deleter) });
                    if result.is_err() {
                        assert!(deleted2.get());
                        assert!(!deleted1.get());
                        assert_eq!(sp.as_ptr(), ptr1);
                        assert_eq!(*sp, 42);
                    } else {
                        assert!(deleted1.get());
                        assert_eq!(*sp, 43);
                    }
                    result
                });
            }

            #[test]
            fn reset_ptr_keeps_siblings() {
                faulty_run(|| {
                    let (ptr1, deleted1) = tracker(1);
                    let (ptr2, _deleted2) = tracker(2);
                    let mut sp = unsafe { $ptr::<Tracker>::from_raw(ptr1) };
                    let sibling = sp.clone();
                    let result = armed(|| unsafe { sp.try_reset_raw(ptr2) });
                    assert!(!deleted1.get());
                    if result.is_err() {
                        assert!(sp == sibling);
                        assert_eq!(sibling.use_count(), 2);
                    } else {
                        assert!(sp != sibling);
                        assert_eq!(sibling.use_count(), 1);
                    }
                    result
                });
            }

            #[test]
            fn try_new() {
                let runs = faulty_run(|| {
                    let deleted = Rc::new(Cell::new(false));
                    let value = Tracker {
                        value: 3,
                        deleted: deleted.clone(),
                    };
                    let result = armed(|| $ptr::try_new(value));
                    assert_eq!(result.is_err(), deleted.get());
                    result.map(|p| assert_eq!(p.value, 3))
                });
                assert_eq!(runs, 3);
            }
        }
    };
}

common_fault_tests!(shared_ptr, SharedPtr);
common_fault_tests!(linked_ptr, LinkedPtr);

mod allocations {
    use super::*;
    use shared_ring::{LinkedPtr, SharedPtr};

    #[test]
    fn shared_ptr() {
        let counts = count_allocations(|| {
            let raw = Box::into_raw(Box::new(1337));
            let p: SharedPtr<i32> = unsafe { SharedPtr::from_raw(raw) };
            assert_eq!(*p, 1337);
        });
        assert_eq!(counts, (2, 2));
    }

    #[test]
    fn linked_ptr() {
        let counts = count_allocations(|| {
            let raw = Box::into_raw(Box::new(1337));
            let p: LinkedPtr<i32> = unsafe { LinkedPtr::from_raw(raw) };
            assert_eq!(*p, 1337);
        });
        assert_eq!(counts, (2, 2));
    }

    #[test]
    fn shared_clone_does_not_allocate() {
        let p = SharedPtr::new(1);
        let counts = count_allocations(|| {
            let q = p.clone();
            let mut r: SharedPtr<i32> = SharedPtr::null();
            r.assign(&q);
            assert_eq!(r.use_count(), 3);
        });
        assert_eq!(counts, (0, 0));
    }

    #[test]
    fn linked_clone_allocates_one_node() {
        let p = LinkedPtr::new(1);
        let counts = count_allocations(|| {
            let q = p.clone();
            assert_eq!(q.use_count(), 2);
        });
        assert_eq!(counts, (1, 1));
    }

    #[test]
    fn empty_handles_do_not_allocate() {
        let counts = count_allocations(|| {
            let s = SharedPtr::<i32>::null();
            let l = LinkedPtr::<i32>::null();
            let _s2 = s.clone();
            let _l2 = l.clone();
        });
        assert_eq!(counts, (0, 0));
    }
}

mod linked_only {
    use super::*;
    use shared_ring::LinkedPtr;

    #[test]
    fn try_clone() {
        faulty_run(|| {
            let (raw, deleted) = tracker(1);
            let p = unsafe { LinkedPtr::<Tracker>::from_raw(raw) };
            let result = armed(|| p.try_clone());
            assert!(!deleted.get());
            match result {
                Ok(q) => {
                    assert_eq!(p.use_count(), 2);
                    assert!(p == q);
                    Ok(())
                }
                Err(e) => {
                    assert_eq!(p.use_count(), 1);
                    Err(e)
                }
            }
        });
    }

    #[test]
    fn try_assign_from() {
        faulty_run(|| {
            let (ptr1, deleted1) = tracker(1);
            let (ptr2, deleted2) = tracker(2);
            let p = unsafe { LinkedPtr::<Tracker>::from_raw(ptr1) };
            let _sibling = p.clone();
            let mut q = unsafe { LinkedPtr::<Tracker>::from_raw(ptr2) };
            let result = armed(|| q.try_assign_from(&p));
            assert!(!deleted1.get());
            if result.is_err() {
                assert!(!deleted2.get());
                assert_eq!(q.as_ptr(), ptr2);
                assert_eq!(p.use_count(), 2);
            } else {
                assert!(deleted2.get());
                assert!(q == p);
                assert_eq!(p.use_count(), 3);
            }
            result
        });
    }
}
