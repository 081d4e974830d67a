//! The reclamation capability shared by every structure.
//!
//! Structures are written once against these traits and pick a strategy at
//! construction by receiving a domain value:
//!
//! - [`Reclaim`]: a cloneable domain (hazard registry or RCU engine).
//! - [`ReclaimHandle`]: a thread's registration with a domain.
//! - [`Protect`]: an active critical section opened by
//!   [`ReclaimHandle::pin`], through which shared nodes are loaded and
//!   retired.
//!
//! Hazard guards publish every protected pointer in a numbered slot. RCU
//! guards are read-side critical sections, so `protect` is a plain acquire
//! load and slot ids are ignored.

use crate::error::Result;
use core::sync::atomic::AtomicPtr;

/// A reclamation domain.
pub trait Reclaim: Clone + Send + Sync + 'static {
    /// Per-thread registration.
    type Handle: ReclaimHandle<Domain = Self>;

    /// Registers the calling thread.
    fn register(&self) -> Result<Self::Handle>;

    /// Whether `self` and `other` are clones of the same domain.
    fn same_domain(&self, other: &Self) -> bool;
}

/// A thread's membership in a domain. Dropping it deregisters the thread.
pub trait ReclaimHandle {
    /// The domain this handle was registered with.
    type Domain: Reclaim;

    /// Guard type returned by [`pin`](Self::pin).
    type Guard<'h>: Protect
    where
        Self: 'h;

    /// The owning domain.
    fn domain(&self) -> &Self::Domain;

    /// Opens a critical section.
    fn pin(&self) -> Self::Guard<'_>;
}

/// Operations available inside a critical section.
///
/// Slot ids are private to the guard. Hazard guards opened on one handle
/// while another is live get a fresh window of the thread's slots, so a
/// structure may always use slots `0..n` without disturbing what an
/// enclosing guard protects. Only the innermost live guard may publish or
/// clear; using an outer one panics. The thread needs enough slots for the
/// sum of the windows that are live at once.
pub trait Protect {
    /// Loads `src` and keeps the loaded node alive until the slot is cleared
    /// or the guard is dropped. Retries until the published value matches
    /// `src`.
    fn protect<T>(&self, slot: usize, src: &AtomicPtr<T>) -> *mut T;

    /// Publishes `ptr` without validation. The caller must re-validate
    /// through a location that proves `ptr` was still reachable after the
    /// publication.
    fn protect_ptr<T>(&self, slot: usize, ptr: *mut T);

    /// Drops the protection held in `slot`. Slots of enclosing guards are
    /// out of reach.
    fn clear(&self, slot: usize);

    /// Hands an unlinked `Box`-allocated pointer to the domain.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, be unreachable from the shared
    /// structure, and be retired exactly once.
    unsafe fn retire<T: Send>(&self, ptr: *mut T);
}
