//! Type-erased retired objects and the domain-wide orphan list.
//!
//! A retired pointer is stored together with a monomorphized destructor so
//! that one retire list can hold nodes of any type. Orphans are batches left
//! behind by deregistered threads; they are pushed onto a lock-free
//! intrusive stack and adopted wholesale by the next scan.

use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

/// Type-erased destructor function
pub(crate) type DestructorFn = unsafe fn(*mut u8);

/// A pointer handed to the reclamation subsystem, waiting to be freed.
pub(crate) struct Retired {
    ptr: *mut u8,
    destructor: DestructorFn,
}

impl Retired {
    /// Wraps a `Box`-allocated pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, be unreachable for new readers,
    /// and be retired exactly once.
    #[inline]
    pub(crate) unsafe fn new<T>(ptr: *mut T) -> Self {
        Self {
            ptr: ptr.cast(),
            destructor: drop_boxed::<T>,
        }
    }

    /// Address used to match against published hazards.
    #[inline]
    pub(crate) fn addr(&self) -> usize {
        self.ptr as usize
    }

    /// Runs the destructor.
    ///
    /// # Safety
    ///
    /// No thread may still hold a reference to the object.
    #[inline]
    pub(crate) unsafe fn reclaim(self) {
        unsafe { (self.destructor)(self.ptr) }
    }
}

// SAFETY: retire requires `T: Send`, so the erased object may be freed on
// any thread.
unsafe impl Send for Retired {}

unsafe fn drop_boxed<T>(ptr: *mut u8) {
    unsafe { drop(Box::from_raw(ptr.cast::<T>())) }
}

struct OrphanBatch {
    items: Vec<Retired>,
    next: *mut OrphanBatch,
}

/// Lock-free stack of retired batches abandoned by exiting threads.
pub(crate) struct OrphanList {
    head: AtomicPtr<OrphanBatch>,
}

impl OrphanList {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Publishes a batch for adoption.
    pub(crate) fn push(&self, items: Vec<Retired>) {
        if items.is_empty() {
            return;
        }
        let batch = Box::into_raw(Box::new(OrphanBatch {
            items,
            next: ptr::null_mut(),
        }));
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*batch).next = head };
            match self
                .head
                .compare_exchange_weak(head, batch, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Detaches every batch at once. Swapping the whole list out means no
    /// batch is ever observed by two adopters.
    pub(crate) fn take_all(&self) -> Vec<Retired> {
        let mut curr = self.head.swap(ptr::null_mut(), Ordering::Acquire);
        let mut adopted = Vec::new();
        while !curr.is_null() {
            let batch = unsafe { Box::from_raw(curr) };
            curr = batch.next;
            adopted.extend(batch.items);
        }
        adopted
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl Drop for OrphanList {
    fn drop(&mut self) {
        for retired in self.take_all() {
            // SAFETY: the list is dropped with its domain, after every handle
            // (and thus every hazard) is gone.
            unsafe { retired.reclaim() };
        }
    }
}
