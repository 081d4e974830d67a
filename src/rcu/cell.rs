//! An RCU-protected value.
//!
//! Readers get a snapshot reference that stays valid for as long as their
//! [`RcuRef`] lives, even if a writer publishes a replacement meanwhile.
//! Writers swap in a new allocation and either wait for a grace period before
//! freeing the old one ([`RcuCell::update`]) or retire it through their
//! handle ([`RcuCell::update_deferred`]).

use super::{Rcu, RcuGuard, RcuHandle};
use crate::reclaim::Reclaim;
use core::marker::PhantomData;
use core::ops::Deref;
use core::sync::atomic::{AtomicPtr, Ordering};

/// A value that readers access without locks while writers replace it.
pub struct RcuCell<T> {
    rcu: Rcu,
    ptr: AtomicPtr<T>,
    _marker: PhantomData<Box<T>>,
}

// SAFETY: values are shared with readers on other threads (`Sync`) and freed
// on whichever thread retires them (`Send`).
unsafe impl<T: Send + Sync> Send for RcuCell<T> {}
unsafe impl<T: Send + Sync> Sync for RcuCell<T> {}

impl<T: Send + Sync + 'static> RcuCell<T> {
    /// Creates a cell bound to `rcu` holding `value`.
    pub fn new(rcu: Rcu, value: T) -> Self {
        Self {
            rcu,
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
            _marker: PhantomData,
        }
    }

    /// The engine this cell is bound to.
    pub fn rcu(&self) -> &Rcu {
        &self.rcu
    }

    fn check(&self, handle: &RcuHandle) {
        assert!(
            self.rcu.same_domain(handle.rcu()),
            "RcuHandle belongs to a different Rcu engine than this cell"
        );
    }

    /// Reads the current value inside a read-side critical section.
    pub fn read<'a>(&'a self, handle: &'a RcuHandle) -> RcuRef<'a, T> {
        self.check(handle);
        let guard = handle.pin();
        let ptr = self.ptr.load(Ordering::Acquire);
        RcuRef {
            _guard: guard,
            // SAFETY: `ptr` was current inside the read section; a writer
            // frees it only after this section ends.
            value: unsafe { &*ptr },
        }
    }

    /// Publishes `value`, waits for a grace period and frees the previous
    /// value.
    ///
    /// # Panics
    ///
    /// Panics when `handle` is inside a read section.
    pub fn update(&self, handle: &RcuHandle, value: T) {
        self.check(handle);
        let old = self.publish(value);
        handle.synchronize();
        // SAFETY: unlinked before the grace period started.
        unsafe { drop(Box::from_raw(old)) };
    }

    /// Publishes `value` and retires the previous one through `handle`
    /// without waiting.
    pub fn update_deferred(&self, handle: &RcuHandle, value: T) {
        self.check(handle);
        let old = self.publish(value);
        // SAFETY: `old` is no longer reachable through the cell.
        unsafe { handle.retire(old) };
    }

    /// Publishes `value` unless another writer is inside a grace period, in
    /// which case the value is handed back. The previous value is freed on
    /// the spot when no reader predates the update, and retired otherwise.
    pub fn try_update(&self, handle: &RcuHandle, value: T) -> Result<(), T> {
        self.check(handle);
        if self.rcu.state.writer.is_locked() {
            return Err(value);
        }
        let old = self.publish(value);
        if handle.try_synchronize().is_some() {
            // SAFETY: a grace period elapsed after the swap.
            unsafe { drop(Box::from_raw(old)) };
        } else {
            // SAFETY: `old` is no longer reachable through the cell.
            unsafe { handle.retire(old) };
        }
        Ok(())
    }

    fn publish(&self, value: T) -> *mut T {
        let new = Box::into_raw(Box::new(value));
        self.ptr.swap(new, Ordering::AcqRel)
    }
}

impl<T> Drop for RcuCell<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out live `RcuRef`s.
        unsafe { drop(Box::from_raw(*self.ptr.get_mut())) };
    }
}

impl<T> core::fmt::Debug for RcuCell<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RcuCell").finish_non_exhaustive()
    }
}

/// A snapshot of an [`RcuCell`] value, valid while the read section lasts.
pub struct RcuRef<'a, T> {
    _guard: RcuGuard<'a>,
    value: &'a T,
}

impl<T> Deref for RcuRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.value
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for RcuRef<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(self.value, f)
    }
}
