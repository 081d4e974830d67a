//! Michael-Scott queue with lazy tail advancement.
//!
//! Enqueuers do not swing `tail` on every insert. They walk from the current
//! tail to the real last node, link behind it, and only move `tail` when the
//! nodes walked plus the new one reach [`TAIL_LAG_THRESHOLD`]. This trades a
//! short walk for far fewer CASes on the contended tail word.
//!
//! The walk is hand-over-hand: slot 0 pins the starting tail while slots 1
//! and 2 alternate along the chain. Every step re-reads `tail`; as long as it
//! still names the pinned node, nothing behind it can have been retired,
//! because dequeuers never move `head` past `tail`.

use crate::check_domain;
use crate::ms_queue::{dequeue_with, HEAD_SLOT};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use crossbeam_utils::{Backoff, CachePadded};
use haven::{HazardDomain, Node, Protect, Reclaim, ReclaimHandle};
use tracing::trace;

/// An enqueuer moves `tail` onto its new node once `walked + 1` reaches this,
/// where `walked` counts the `next` hops from `tail` to the last node.
pub const TAIL_LAG_THRESHOLD: usize = 4;

const TAIL_SLOT: usize = 0;

#[inline]
fn walk_slot(step: usize) -> usize {
    1 + step % 2
}

/// Lock-free FIFO queue whose tail may trail the last node.
pub struct OptimisticMsQueue<T, R: Reclaim = HazardDomain> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    domain: R,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, R: Reclaim> Send for OptimisticMsQueue<T, R> {}
unsafe impl<T: Send, R: Reclaim> Sync for OptimisticMsQueue<T, R> {}

/// Outcome of walking from a pinned tail to the last node.
enum Walk<T> {
    Last { node: *mut Node<T>, walked: usize },
    TailMoved,
}

impl<T: Send, R: Reclaim> OptimisticMsQueue<T, R> {
    /// Creates an empty queue reclaiming through `domain`.
    pub fn new(domain: R) -> Self {
        let dummy = Box::into_raw(Node::dummy());
        Self {
            head: CachePadded::new(AtomicPtr::new(dummy)),
            tail: CachePadded::new(AtomicPtr::new(dummy)),
            domain,
            _marker: PhantomData,
        }
    }

    /// The reclamation domain.
    pub fn domain(&self) -> &R {
        &self.domain
    }

    /// Walks from `tail` to the last node, keeping each visited node
    /// protected until its successor is.
    fn walk_to_last<G: Protect>(&self, tail: *mut Node<T>, guard: &G) -> Walk<T> {
        let mut last = tail;
        let mut walked = 0;
        loop {
            // SAFETY: `last` is protected and `tail` still named the pinned
            // node after it was published.
            let next = unsafe { (*last).next(Ordering::Acquire) };
            if next.is_null() {
                return Walk::Last { node: last, walked };
            }
            guard.protect_ptr(walk_slot(walked), next);
            if self.tail.load(Ordering::Acquire) != tail {
                return Walk::TailMoved;
            }
            last = next;
            walked += 1;
        }
    }

    /// Appends `value` at the back of the queue.
    pub fn enqueue(&self, value: T, handle: &R::Handle) {
        check_domain(&self.domain, handle);
        let node = Box::into_raw(Node::new(value));
        let guard = handle.pin();
        let backoff = Backoff::new();

        loop {
            let tail = guard.protect(TAIL_SLOT, &self.tail);
            let (last, walked) = match self.walk_to_last(tail, &guard) {
                Walk::Last { node, walked } => (node, walked),
                Walk::TailMoved => continue,
            };

            // SAFETY: `last` is protected by the walk.
            if unsafe { (*last).set_next(ptr::null_mut(), node) } {
                if walked + 1 >= TAIL_LAG_THRESHOLD {
                    trace!(walked, "advancing lagging tail");
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                }
                return;
            }
            backoff.spin();
        }
    }

    /// Removes the front value, or returns `None` when the queue is empty.
    pub fn dequeue(&self, handle: &R::Handle) -> Option<T> {
        check_domain(&self.domain, handle);
        let guard = handle.pin();
        dequeue_with(&self.head, &self.tail, &guard)
    }

    /// Whether the queue held no element at the moment of the check.
    pub fn is_empty(&self, handle: &R::Handle) -> bool {
        check_domain(&self.domain, handle);
        let guard = handle.pin();
        let head = guard.protect(HEAD_SLOT, &self.head);
        // SAFETY: the dummy is protected.
        unsafe { (*head).next(Ordering::Acquire).is_null() }
    }

    /// Number of nodes linked behind the node `tail` currently names.
    pub fn tail_lag(&self, handle: &R::Handle) -> usize {
        check_domain(&self.domain, handle);
        let guard = handle.pin();
        loop {
            let tail = guard.protect(TAIL_SLOT, &self.tail);
            if let Walk::Last { walked, .. } = self.walk_to_last(tail, &guard) {
                return walked;
            }
        }
    }
}

impl<T, R: Reclaim> Drop for OptimisticMsQueue<T, R> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        // SAFETY: exclusive access; the head is a dummy with a vacant slot.
        unsafe { Node::drop_chain(head, true) };
    }
}

impl<T, R: Reclaim + core::fmt::Debug> core::fmt::Debug for OptimisticMsQueue<T, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OptimisticMsQueue")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
