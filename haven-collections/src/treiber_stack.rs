//! Treiber stack with elimination backoff.
//!
//! Pushes and pops CAS a single head pointer. A thread that loses the CAS
//! [`ELIMINATION_AFTER`] times in one operation also tries the elimination
//! array, where a push and a pop can meet and exchange the value directly.
//! Pops protect the head through the stack's reclamation domain before
//! reading its successor, and retire the node after unlinking it.

use crate::check_domain;
use crate::elimination::{EliminationArray, DEFAULT_WIDTH};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use crossbeam_utils::{Backoff, CachePadded};
use haven::{HazardDomain, Node, Protect, Reclaim, ReclaimHandle};

/// Failed head CASes after which an operation starts trying elimination.
pub const ELIMINATION_AFTER: usize = 2;

const HEAD_SLOT: usize = 0;

/// Lock-free LIFO stack.
pub struct TreiberStack<T, R: Reclaim = HazardDomain> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    elimination: EliminationArray<T>,
    domain: R,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, R: Reclaim> Send for TreiberStack<T, R> {}
unsafe impl<T: Send, R: Reclaim> Sync for TreiberStack<T, R> {}

impl<T: Send, R: Reclaim> TreiberStack<T, R> {
    /// Creates an empty stack reclaiming through `domain`.
    pub fn new(domain: R) -> Self {
        Self::with_elimination_width(domain, DEFAULT_WIDTH)
    }

    /// Creates an empty stack with `width` elimination cells.
    pub fn with_elimination_width(domain: R, width: usize) -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            elimination: EliminationArray::new(width),
            domain,
            _marker: PhantomData,
        }
    }

    /// The reclamation domain.
    pub fn domain(&self) -> &R {
        &self.domain
    }

    /// Number of push/pop pairs that completed through elimination.
    pub fn eliminated(&self) -> usize {
        self.elimination.exchanges()
    }

    /// Pushes `value` on top of the stack.
    pub fn push(&self, value: T, handle: &R::Handle) {
        check_domain(&self.domain, handle);
        let node = Box::into_raw(Node::new(value));
        let backoff = Backoff::new();
        let mut failures = 0;

        loop {
            let head = self.head.load(Ordering::Relaxed);
            // SAFETY: `node` is still private to this thread.
            unsafe { (*node).store_next(head, Ordering::Relaxed) };

            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }

            failures += 1;
            if failures >= ELIMINATION_AFTER && self.elimination.offer(node) {
                return;
            }
            backoff.spin();
        }
    }

    /// Pops the top value, or returns `None` when the stack is empty.
    pub fn pop(&self, handle: &R::Handle) -> Option<T> {
        check_domain(&self.domain, handle);
        let guard = handle.pin();
        let backoff = Backoff::new();
        let mut failures = 0;

        loop {
            let head = guard.protect(HEAD_SLOT, &self.head);
            if head.is_null() {
                return None;
            }

            // SAFETY: `head` is protected and was still the head after the
            // protection became visible.
            let next = unsafe { (*head).next(Ordering::Acquire) };

            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: winning the CAS makes this thread the only one to
                // take the payload.
                let value = unsafe { (*head).take() };
                guard.clear(HEAD_SLOT);
                // SAFETY: unlinked by the CAS above.
                unsafe { guard.retire(head) };
                return Some(value);
            }

            failures += 1;
            if failures >= ELIMINATION_AFTER {
                if let Some(value) = self.elimination.take() {
                    return Some(value);
                }
            }
            backoff.spin();
        }
    }

    /// Whether the stack held no element at the moment of the check.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T, R: Reclaim> Drop for TreiberStack<T, R> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        // SAFETY: `&mut self` means no operation is in flight; popped nodes
        // are owned by the domain, the rest of the chain by us.
        unsafe { Node::drop_chain(head, false) };
    }
}

impl<T, R: Reclaim + core::fmt::Debug> core::fmt::Debug for TreiberStack<T, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TreiberStack")
            .field("domain", &self.domain)
            .field("elimination", &self.elimination)
            .finish_non_exhaustive()
    }
}
