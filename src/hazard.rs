//! Hazard-pointer registry.
//!
//! A [`HazardDomain`] owns a fixed table of thread records. Each record holds
//! `slots_per_thread` published pointers. A thread claims a record through
//! [`HazardDomain::register`] and publishes the nodes it is about to
//! dereference with [`HazardHandle::protect`]. Unlinked nodes go to the
//! thread's private retire list; once that list outgrows the scan threshold,
//! [`HazardHandle::scan`] snapshots every published slot of every record and
//! frees the retired nodes that no slot names.
//!
//! Scanning uses independent atomic loads only, so it never blocks other
//! threads. A node protected by a stalled reader stays on the retire list
//! indefinitely; safety never depends on reclamation latency.

use crate::config::HazardConfig;
use crate::error::{ReclaimError, Result};
use crate::reclaim::{Protect, Reclaim, ReclaimHandle};
use crate::retired::{OrphanList, Retired};
use core::cell::{Cell, RefCell};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One thread's published hazards.
struct ThreadRecord {
    active: CachePadded<AtomicBool>,
    slots: Box<[CachePadded<AtomicPtr<()>>]>,
}

impl ThreadRecord {
    fn new(slots: usize) -> Self {
        Self {
            active: CachePadded::new(AtomicBool::new(false)),
            slots: (0..slots)
                .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
                .collect(),
        }
    }
}

struct Registry {
    config: HazardConfig,
    records: Box<[ThreadRecord]>,
    registered: AtomicUsize,
    orphans: OrphanList,
}

/// A hazard-pointer reclamation domain.
///
/// Cloning is cheap and yields another reference to the same registry.
#[derive(Clone)]
pub struct HazardDomain {
    registry: Arc<Registry>,
}

impl HazardDomain {
    /// Creates a domain with the given configuration.
    pub fn new(config: HazardConfig) -> Self {
        let records = (0..config.max_threads())
            .map(|_| ThreadRecord::new(config.slots_per_thread()))
            .collect();
        Self {
            registry: Arc::new(Registry {
                config,
                records,
                registered: AtomicUsize::new(0),
                orphans: OrphanList::new(),
            }),
        }
    }

    /// Creates a domain with [`HazardConfig::default`].
    pub fn with_defaults() -> Self {
        Self::new(HazardConfig::default())
    }

    /// The domain's configuration.
    pub fn config(&self) -> &HazardConfig {
        &self.registry.config
    }

    /// Number of threads currently registered.
    pub fn registered_threads(&self) -> usize {
        self.registry.registered.load(Ordering::Acquire)
    }

    /// Claims a free thread record for the calling thread.
    pub fn register(&self) -> Result<HazardHandle> {
        let registry = &self.registry;
        for (index, record) in registry.records.iter().enumerate() {
            if record.active.load(Ordering::Relaxed) {
                continue;
            }
            if record
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let registered = registry.registered.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(index, registered, "hazard thread registered");
                return Ok(HazardHandle {
                    domain: self.clone(),
                    index,
                    held: Cell::new(0),
                    pins: Cell::new(0),
                    retired: RefCell::new(Vec::new()),
                    _not_send: PhantomData,
                });
            }
        }
        let capacity = registry.records.len();
        warn!(capacity, "hazard registry full");
        Err(ReclaimError::RegistryFull { capacity })
    }

    /// Sorted snapshot of every non-null hazard across all records.
    fn snapshot(&self) -> Vec<usize> {
        fence(Ordering::SeqCst);
        let mut hazards: Vec<usize> = self
            .registry
            .records
            .iter()
            .flat_map(|record| record.slots.iter())
            .map(|slot| slot.load(Ordering::Acquire) as usize)
            .filter(|&addr| addr != 0)
            .collect();
        hazards.sort_unstable();
        hazards.dedup();
        hazards
    }
}

impl Reclaim for HazardDomain {
    type Handle = HazardHandle;

    fn register(&self) -> Result<HazardHandle> {
        HazardDomain::register(self)
    }

    fn same_domain(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl core::fmt::Debug for HazardDomain {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HazardDomain")
            .field("config", &self.registry.config)
            .field("registered", &self.registered_threads())
            .finish()
    }
}

/// A thread's registration with a [`HazardDomain`].
///
/// The handle is tied to the thread that created it (`!Send`). Dropping it
/// clears the thread's slots, runs a final scan, hands any survivors to the
/// domain's orphan list and frees the record for reuse.
pub struct HazardHandle {
    domain: HazardDomain,
    index: usize,
    /// Bitmap of slots currently published by this thread.
    held: Cell<u64>,
    pins: Cell<usize>,
    retired: RefCell<Vec<Retired>>,
    _not_send: PhantomData<*mut ()>,
}

impl HazardHandle {
    /// The domain this handle belongs to.
    pub fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    /// Index of the claimed thread record.
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    fn record(&self) -> &ThreadRecord {
        &self.domain.registry.records[self.index]
    }

    #[inline]
    fn slot(&self, slot_id: usize) -> &AtomicPtr<()> {
        let slots = &self.record().slots;
        assert!(
            slot_id < slots.len(),
            "hazard slot {slot_id} out of range ({} slots per thread)",
            slots.len()
        );
        &slots[slot_id]
    }

    /// Publishes the current value of `src` in `slot_id` and returns it.
    ///
    /// After publishing, `src` is re-read; if it changed, the new value is
    /// published instead. On return the pointer was still stored in `src`
    /// after it became visible as a hazard, so no scan that starts later can
    /// free it.
    pub fn protect<T>(&self, slot_id: usize, src: &AtomicPtr<T>) -> *mut T {
        let slot = self.slot(slot_id);
        let mut ptr = src.load(Ordering::Relaxed);
        loop {
            slot.store(ptr.cast(), Ordering::Release);
            fence(Ordering::SeqCst);
            let current = src.load(Ordering::Acquire);
            if current == ptr {
                self.held.set(self.held.get() | (1 << slot_id));
                return ptr;
            }
            ptr = current;
        }
    }

    /// Publishes `ptr` in `slot_id` without validating it.
    pub fn protect_ptr<T>(&self, slot_id: usize, ptr: *mut T) {
        let slot = self.slot(slot_id);
        slot.store(ptr.cast(), Ordering::Release);
        fence(Ordering::SeqCst);
        self.held.set(self.held.get() | (1 << slot_id));
    }

    /// Unpublishes `slot_id`.
    ///
    /// # Panics
    ///
    /// Panics when the slot is not currently held.
    pub fn clear(&self, slot_id: usize) {
        let slot = self.slot(slot_id);
        let held = self.held.get();
        assert!(
            held & (1 << slot_id) != 0,
            "hazard slot {slot_id} cleared while not held"
        );
        slot.store(ptr::null_mut(), Ordering::Release);
        self.held.set(held & !(1 << slot_id));
    }

    /// Whether `slot_id` currently publishes a pointer.
    pub fn is_held(&self, slot_id: usize) -> bool {
        slot_id < 64 && self.held.get() & (1 << slot_id) != 0
    }

    fn clear_all(&self) {
        self.clear_from(0);
    }

    /// Unpublishes every held slot at or above `first`.
    fn clear_from(&self, first: usize) {
        let keep = if first >= 64 { u64::MAX } else { (1u64 << first) - 1 };
        let held = self.held.get();
        let mut dropped = held & !keep;
        while dropped != 0 {
            let slot_id = dropped.trailing_zeros() as usize;
            self.record().slots[slot_id].store(ptr::null_mut(), Ordering::Release);
            dropped &= dropped - 1;
        }
        self.held.set(held & keep);
    }

    /// First slot above every slot currently held.
    #[inline]
    fn free_base(&self) -> usize {
        64 - self.held.get().leading_zeros() as usize
    }

    /// Moves an unlinked node onto this thread's retire list, scanning when
    /// the list outgrows the threshold.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, be unreachable from any shared
    /// location, and be retired exactly once.
    pub unsafe fn retire<T: Send>(&self, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        let len = {
            let mut retired = self.retired.borrow_mut();
            retired.push(unsafe { Retired::new(ptr) });
            retired.len()
        };
        let threshold = self
            .domain
            .config()
            .scan_threshold_for(self.domain.registered_threads());
        if len > threshold {
            self.scan();
        }
    }

    /// Frees every retired node that no hazard slot names. Returns the
    /// number of nodes freed.
    pub fn scan(&self) -> usize {
        let mut pending = core::mem::take(&mut *self.retired.borrow_mut());
        let orphans = &self.domain.registry.orphans;
        if !orphans.is_empty() {
            pending.extend(orphans.take_all());
        }
        if pending.is_empty() {
            return 0;
        }

        let hazards = self.domain.snapshot();
        let mut kept = Vec::with_capacity(pending.len());
        let mut freed = 0;
        for retired in pending {
            if hazards.binary_search(&retired.addr()).is_ok() {
                kept.push(retired);
            } else {
                // SAFETY: unlinked before retire, and absent from a hazard
                // snapshot taken after the unlink.
                unsafe { retired.reclaim() };
                freed += 1;
            }
        }
        trace!(
            index = self.index,
            freed,
            kept = kept.len(),
            hazards = hazards.len(),
            "hazard scan"
        );
        // Destructors may have retired more nodes through this handle.
        self.retired.borrow_mut().extend(kept);
        freed
    }

    /// Number of nodes on this thread's retire list.
    pub fn retired_count(&self) -> usize {
        self.retired.borrow().len()
    }

    /// Opens a critical section.
    ///
    /// A guard addresses a window of the thread's slots that starts just
    /// above the highest slot held when it was opened, so a nested guard
    /// (for example one taken inside a collection operation) never touches
    /// the slots of the guards around it. Dropping a guard clears its window.
    pub fn pin(&self) -> HazardGuard<'_> {
        let depth = self.pins.get() + 1;
        self.pins.set(depth);
        HazardGuard {
            handle: self,
            base: self.free_base(),
            depth,
        }
    }
}

impl Drop for HazardHandle {
    fn drop(&mut self) {
        self.clear_all();
        self.scan();
        let leftovers = core::mem::take(&mut *self.retired.borrow_mut());
        let orphaned = leftovers.len();
        self.domain.registry.orphans.push(leftovers);

        let record = self.record();
        record.active.store(false, Ordering::Release);
        let registered = self.domain.registry.registered.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(index = self.index, registered, orphaned, "hazard thread deregistered");
    }
}

impl core::fmt::Debug for HazardHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HazardHandle")
            .field("index", &self.index)
            .field("held", &format_args!("{:#b}", self.held.get()))
            .field("retired", &self.retired_count())
            .finish()
    }
}

impl ReclaimHandle for HazardHandle {
    type Domain = HazardDomain;
    type Guard<'h> = HazardGuard<'h>;

    fn domain(&self) -> &HazardDomain {
        &self.domain
    }

    fn pin(&self) -> HazardGuard<'_> {
        HazardHandle::pin(self)
    }
}

/// RAII critical section over a [`HazardHandle`].
///
/// Slot ids passed to the guard are relative to its window; see
/// [`HazardHandle::pin`]. Only the innermost live guard of a handle may
/// publish or clear slots.
pub struct HazardGuard<'h> {
    handle: &'h HazardHandle,
    base: usize,
    depth: usize,
}

impl HazardGuard<'_> {
    /// The handle this guard was opened on.
    pub fn handle(&self) -> &HazardHandle {
        self.handle
    }

    /// Absolute slot of the handle backing this guard's slot 0.
    pub fn base(&self) -> usize {
        self.base
    }

    #[inline]
    #[track_caller]
    fn absolute(&self, slot: usize) -> usize {
        assert_eq!(
            self.depth,
            self.handle.pins.get(),
            "hazard guard used while a nested guard on the same handle is open"
        );
        self.base + slot
    }
}

impl Drop for HazardGuard<'_> {
    fn drop(&mut self) {
        let pins = self.handle.pins.get();
        debug_assert!(pins > 0, "HazardGuard dropped with pin count 0");
        self.handle.pins.set(pins - 1);
        if pins == 1 {
            self.handle.clear_all();
        } else if self.depth == pins {
            self.handle.clear_from(self.base);
        }
        // An outer guard dropped before its nested guards leaves their slots
        // published until the last guard goes.
    }
}

impl Protect for HazardGuard<'_> {
    #[inline]
    fn protect<T>(&self, slot: usize, src: &AtomicPtr<T>) -> *mut T {
        self.handle.protect(self.absolute(slot), src)
    }

    #[inline]
    fn protect_ptr<T>(&self, slot: usize, ptr: *mut T) {
        self.handle.protect_ptr(self.absolute(slot), ptr)
    }

    #[inline]
    fn clear(&self, slot: usize) {
        self.handle.clear(self.absolute(slot))
    }

    #[inline]
    unsafe fn retire<T: Send>(&self, ptr: *mut T) {
        unsafe { self.handle.retire(ptr) }
    }
}
