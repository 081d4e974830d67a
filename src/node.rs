//! The singly-linked node every structure links through.
//!
//! A `Node<T>` owns a payload slot and an atomic `next` pointer. The payload
//! is moved out at most once, by whichever thread wins the CAS that unlinks
//! the node (or, for queues, the CAS that makes it the new dummy). Freeing a
//! node never drops its payload, so a retired node can be reclaimed on any
//! thread long after its value was handed to the caller.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A heap node with a payload slot and an atomically swappable successor.
pub struct Node<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    next: AtomicPtr<Node<T>>,
}

// SAFETY: the payload is written before the node is published and read by a
// single CAS winner afterwards; `next` is atomic.
unsafe impl<T: Send> Send for Node<T> {}
unsafe impl<T: Send> Sync for Node<T> {}

impl<T> Node<T> {
    /// Allocates a node holding `value`, with no successor.
    pub fn new(value: T) -> Box<Self> {
        Box::new(Self {
            value: UnsafeCell::new(MaybeUninit::new(value)),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Allocates a node with a vacant payload slot (a queue sentinel).
    pub fn dummy() -> Box<Self> {
        Box::new(Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            next: AtomicPtr::new(ptr::null_mut()),
        })
    }

    /// Loads the successor.
    #[inline]
    pub fn next(&self, order: Ordering) -> *mut Node<T> {
        self.next.load(order)
    }

    /// Replaces the successor if it still equals `expected`.
    ///
    /// Acquire-release on success: a thread that later observes `new` through
    /// this field also observes every write made to `new` before the CAS.
    #[inline]
    pub fn set_next(&self, expected: *mut Node<T>, new: *mut Node<T>) -> bool {
        self.next
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Plain store, for nodes not yet visible to other threads.
    #[inline]
    pub fn store_next(&self, next: *mut Node<T>, order: Ordering) {
        self.next.store(next, order);
    }

    /// Borrows the payload.
    ///
    /// # Safety
    ///
    /// The slot must be occupied and not concurrently taken.
    #[inline]
    pub unsafe fn value(&self) -> &T {
        unsafe { (*self.value.get()).assume_init_ref() }
    }

    /// Moves the payload out, leaving the slot logically vacant.
    ///
    /// # Safety
    ///
    /// The slot must be occupied, and the caller must be the unique thread
    /// entitled to take it.
    #[inline]
    pub unsafe fn take(&self) -> T {
        unsafe { (*self.value.get()).assume_init_read() }
    }

    /// Frees a privately owned chain starting at `head`, dropping payloads.
    /// When `vacant_head` is set the first node's slot is treated as empty.
    ///
    /// # Safety
    ///
    /// The caller must own every node of the chain exclusively, and every
    /// node except (optionally) the head must hold a payload.
    pub unsafe fn drop_chain(head: *mut Node<T>, vacant_head: bool) {
        let mut curr = head;
        let mut vacant = vacant_head;
        while !curr.is_null() {
            let node = unsafe { Box::from_raw(curr) };
            curr = node.next.load(Ordering::Relaxed);
            if !vacant {
                unsafe { drop(node.take()) };
            }
            vacant = false;
        }
    }
}

impl<T> core::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("next", &self.next.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
