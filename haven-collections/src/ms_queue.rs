//! Michael-Scott queue.
//!
//! The queue always holds at least one node: `head` points at a dummy whose
//! successor is the oldest element. Enqueue links the new node after the
//! last one with a CAS on its `next` and then tries to swing `tail`; any
//! thread that finds `tail` lagging helps advance it first, so `tail` is
//! never more than one node behind. Dequeue swings `head` to its successor,
//! takes the payload out of it (it becomes the new dummy) and retires the
//! old dummy.

use crate::check_domain;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use crossbeam_utils::{Backoff, CachePadded};
use haven::{HazardDomain, Node, Protect, Reclaim, ReclaimHandle};

pub(crate) const HEAD_SLOT: usize = 0;
pub(crate) const NEXT_SLOT: usize = 1;
const TAIL_SLOT: usize = 0;

/// Lock-free FIFO queue.
pub struct MsQueue<T, R: Reclaim = HazardDomain> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    domain: R,
    _marker: PhantomData<T>,
}

unsafe impl<T: Send, R: Reclaim> Send for MsQueue<T, R> {}
unsafe impl<T: Send, R: Reclaim> Sync for MsQueue<T, R> {}

impl<T: Send, R: Reclaim> MsQueue<T, R> {
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

    /// Appends `value` at the back of the queue.
    pub fn enqueue(&self, value: T, handle: &R::Handle) {
        check_domain(&self.domain, handle);
        let node = Box::into_raw(Node::new(value));
        let guard = handle.pin();
        let backoff = Backoff::new();

        loop {
            let tail = guard.protect(TAIL_SLOT, &self.tail);
            // SAFETY: `tail` is protected and was the tail after protection;
            // head never passes tail, so it has not been retired.
            let next = unsafe { (*tail).next(Ordering::Acquire) };

            if !next.is_null() {
                // Tail lags: help the stalled enqueuer, then retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            if unsafe { (*tail).set_next(ptr::null_mut(), node) } {
                // Best effort; whoever sees the lag next will finish it.
                let _ = self.tail.compare_exchange(
                    tail,
                    node,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
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
}

/// Shared dequeue of both queue variants: head never passes tail, so the
/// retired dummy is never the node `tail` points at.
pub(crate) fn dequeue_with<T, G: Protect>(
    head_cell: &AtomicPtr<Node<T>>,
    tail_cell: &AtomicPtr<Node<T>>,
    guard: &G,
) -> Option<T>
where
    T: Send,
{
    let backoff = Backoff::new();
    loop {
        let head = guard.protect(HEAD_SLOT, head_cell);
        let tail = tail_cell.load(Ordering::Acquire);
        // SAFETY: `head` is protected and validated.
        let next = unsafe { (*head).next(Ordering::Acquire) };
        guard.protect_ptr(NEXT_SLOT, next);

        // `head` unchanged after publishing `next` proves `next` was not yet
        // retired when it became protected.
        if head_cell.load(Ordering::Acquire) != head {
            continue;
        }
        if next.is_null() {
            return None;
        }
        if head == tail {
            let _ = tail_cell.compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            continue;
        }

        if head_cell
            .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // SAFETY: only the CAS winner takes the new dummy's payload, and
            // `next` stays protected until the guard drops.
            let value = unsafe { (*next).take() };
            guard.clear(HEAD_SLOT);
            // SAFETY: unlinked by the CAS above.
            unsafe { guard.retire(head) };
            return Some(value);
        }
        backoff.spin();
    }
}

impl<T, R: Reclaim> Drop for MsQueue<T, R> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        // SAFETY: exclusive access; the head is a dummy with a vacant slot.
        unsafe { Node::drop_chain(head, true) };
    }
}

impl<T, R: Reclaim + core::fmt::Debug> core::fmt::Debug for MsQueue<T, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MsQueue")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}
