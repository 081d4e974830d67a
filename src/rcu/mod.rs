//! Single-writer RCU engine.
//!
//! Readers announce the global epoch they entered in and clear the
//! announcement on exit; they never block and never take a lock. The writer
//! side, [`RcuHandle::synchronize`], is serialized by a mutex that only
//! writers touch. It advances the epoch and polls every reader record until
//! no reader is left in an older epoch. That interval is the grace period:
//! anything unlinked before it started can no longer be referenced.
//!
//! Retired nodes are tagged with the epoch current at retirement and freed
//! by [`RcuHandle::reclaim`] once a grace period past that tag has elapsed.
//! `synchronize` spins (and then sleeps `poll_interval`) for as long as a
//! reader stays inside its critical section; bounding critical sections is
//! the caller's job.

mod cell;

pub use cell::{RcuCell, RcuRef};

use crate::config::RcuConfig;
use crate::error::{ReclaimError, Result};
use crate::reclaim::{Protect, Reclaim, ReclaimHandle};
use crate::retired::Retired;
use core::cell::{Cell, RefCell};
use core::marker::PhantomData;
use core::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;
use portable_atomic::AtomicU64;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Reader record value meaning "not inside a read-side critical section".
const QUIESCENT: u64 = 0;

struct ReaderRecord {
    active: AtomicBool,
    /// Epoch observed at the outermost `read_lock`, or `QUIESCENT`.
    epoch: CachePadded<AtomicU64>,
}

struct RcuState {
    config: RcuConfig,
    epoch: CachePadded<AtomicU64>,
    readers: Box<[ReaderRecord]>,
    registered: AtomicUsize,
    writer: Mutex<()>,
}

/// A single-writer RCU domain.
///
/// Cloning is cheap and yields another reference to the same engine.
#[derive(Clone)]
pub struct Rcu {
    state: Arc<RcuState>,
}

impl Rcu {
    /// Creates an engine with the given configuration.
    pub fn new(config: RcuConfig) -> Self {
        let readers = (0..config.max_threads())
            .map(|_| ReaderRecord {
                active: AtomicBool::new(false),
                epoch: CachePadded::new(AtomicU64::new(QUIESCENT)),
            })
            .collect();
        Self {
            state: Arc::new(RcuState {
                config,
                epoch: CachePadded::new(AtomicU64::new(1)),
                readers,
                registered: AtomicUsize::new(0),
                writer: Mutex::new(()),
            }),
        }
    }

    /// Creates an engine with [`RcuConfig::default`].
    pub fn with_defaults() -> Self {
        Self::new(RcuConfig::default())
    }

    /// The engine's configuration.
    pub fn config(&self) -> &RcuConfig {
        &self.state.config
    }

    /// The current global epoch.
    pub fn current_epoch(&self) -> u64 {
        self.state.epoch.load(Ordering::SeqCst)
    }

    /// Number of threads currently registered.
    pub fn registered_threads(&self) -> usize {
        self.state.registered.load(Ordering::Acquire)
    }

    /// Claims a free reader record for the calling thread.
    pub fn register(&self) -> Result<RcuHandle> {
        let state = &self.state;
        for (index, record) in state.readers.iter().enumerate() {
            if record.active.load(Ordering::Relaxed) {
                continue;
            }
            if record
                .active
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                let registered = state.registered.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(index, registered, "rcu thread registered");
                return Ok(RcuHandle {
                    rcu: self.clone(),
                    index,
                    depth: Cell::new(0),
                    retired: RefCell::new(Vec::new()),
                    _not_send: PhantomData,
                });
            }
        }
        let capacity = state.readers.len();
        warn!(capacity, "rcu registry full");
        Err(ReclaimError::RegistryFull { capacity })
    }

    /// Starts a new epoch and returns it. Callers hold the writer lock.
    fn advance(&self) -> u64 {
        let target = self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        fence(Ordering::SeqCst);
        target
    }

    /// Whether some reader is still inside an epoch older than `target`.
    fn is_stale(record: &ReaderRecord, target: u64) -> bool {
        let epoch = record.epoch.load(Ordering::Acquire);
        epoch != QUIESCENT && epoch < target
    }

    /// Single non-blocking pass over the reader records.
    fn readers_clear(&self, target: u64) -> bool {
        !self
            .state
            .readers
            .iter()
            .any(|record| Self::is_stale(record, target))
    }

    /// Polls every reader record until none is stale relative to `target`.
    fn wait_for_readers(&self, target: u64) {
        let poll_interval = self.state.config.poll_interval();
        for record in self.state.readers.iter() {
            let backoff = Backoff::new();
            while Self::is_stale(record, target) {
                if backoff.is_completed() {
                    std::thread::sleep(poll_interval);
                } else {
                    backoff.snooze();
                }
            }
        }
    }
}

impl Reclaim for Rcu {
    type Handle = RcuHandle;

    fn register(&self) -> Result<RcuHandle> {
        Rcu::register(self)
    }

    fn same_domain(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl core::fmt::Debug for Rcu {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Rcu")
            .field("config", &self.state.config)
            .field("epoch", &self.current_epoch())
            .field("registered", &self.registered_threads())
            .finish()
    }
}

/// A thread's registration with an [`Rcu`] engine.
///
/// The handle is tied to the thread that created it (`!Send`). Dropping it
/// leaves any read section, waits out one grace period to free everything
/// the thread retired, and releases the reader record.
pub struct RcuHandle {
    rcu: Rcu,
    index: usize,
    depth: Cell<usize>,
    retired: RefCell<Vec<(u64, Retired)>>,
    _not_send: PhantomData<*mut ()>,
}

impl RcuHandle {
    /// The engine this handle belongs to.
    pub fn rcu(&self) -> &Rcu {
        &self.rcu
    }

    /// Index of the claimed reader record.
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    fn record(&self) -> &ReaderRecord {
        &self.rcu.state.readers[self.index]
    }

    /// Enters a read-side critical section. Nested calls only bump a local
    /// counter; the outermost call announces the current epoch.
    pub fn read_lock(&self) {
        let depth = self.depth.get();
        if depth == 0 {
            let epoch = self.rcu.state.epoch.load(Ordering::SeqCst);
            self.record().epoch.store(epoch, Ordering::SeqCst);
            fence(Ordering::SeqCst);
        }
        self.depth.set(depth + 1);
    }

    /// Leaves a read-side critical section. The outermost call announces
    /// quiescence and, if the retire list has outgrown the threshold,
    /// reclaims.
    ///
    /// # Panics
    ///
    /// Panics without a matching [`read_lock`](Self::read_lock).
    pub fn read_unlock(&self) {
        let depth = self.depth.get();
        assert!(depth > 0, "read_unlock without a matching read_lock");
        self.depth.set(depth - 1);
        if depth == 1 {
            self.record().epoch.store(QUIESCENT, Ordering::Release);
            if self.retired.borrow().len() > self.rcu.state.config.reclaim_threshold() {
                self.reclaim();
            }
        }
    }

    /// Whether the thread is inside a read-side critical section.
    pub fn in_read_section(&self) -> bool {
        self.depth.get() > 0
    }

    /// Opens an RAII read-side critical section.
    pub fn pin(&self) -> RcuGuard<'_> {
        self.read_lock();
        RcuGuard { handle: self }
    }

    fn assert_outside_read_section(&self, op: &str) {
        assert!(
            !self.in_read_section(),
            "{op} called inside a read-side critical section"
        );
    }

    /// Waits for a full grace period and returns the epoch it started.
    ///
    /// Every reader that entered before the call has exited when this
    /// returns. Only one writer runs a grace period at a time.
    ///
    /// # Panics
    ///
    /// Panics when called inside this thread's own read section, which would
    /// otherwise wait on itself forever.
    pub fn synchronize(&self) -> u64 {
        self.assert_outside_read_section("synchronize");
        let _writer = self.rcu.state.writer.lock();
        let target = self.rcu.advance();
        self.rcu.wait_for_readers(target);
        debug!(epoch = target, "rcu grace period elapsed");
        target
    }

    /// Like [`synchronize`](Self::synchronize) but gives up instead of
    /// waiting: returns `None` when another writer holds the writer lock or a
    /// reader is still inside an older epoch on the first poll.
    pub fn try_synchronize(&self) -> Option<u64> {
        self.assert_outside_read_section("try_synchronize");
        let _writer = self.rcu.state.writer.try_lock()?;
        let target = self.rcu.advance();
        if self.rcu.readers_clear(target) {
            debug!(epoch = target, "rcu grace period elapsed");
            Some(target)
        } else {
            None
        }
    }

    /// Tags an unlinked node with the current epoch and defers freeing it
    /// until a grace period has elapsed. Outside a read section this may
    /// reclaim immediately.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Box::into_raw`, be unreachable from any shared
    /// location, and be retired exactly once.
    pub unsafe fn retire<T: Send>(&self, ptr: *mut T) {
        if ptr.is_null() {
            return;
        }
        let epoch = self.rcu.state.epoch.load(Ordering::SeqCst);
        let len = {
            let mut retired = self.retired.borrow_mut();
            retired.push((epoch, unsafe { Retired::new(ptr) }));
            retired.len()
        };
        if !self.in_read_section() && len > self.rcu.state.config.reclaim_threshold() {
            self.reclaim();
        }
    }

    /// Waits for a grace period and frees every node retired before it.
    /// Returns the number of nodes freed.
    pub fn reclaim(&self) -> usize {
        if self.retired.borrow().is_empty() {
            return 0;
        }
        let target = self.synchronize();
        self.free_before(target)
    }

    /// Non-blocking [`reclaim`](Self::reclaim); frees nothing when the grace
    /// period cannot be established on the first attempt.
    pub fn try_reclaim(&self) -> usize {
        if self.retired.borrow().is_empty() {
            return 0;
        }
        match self.try_synchronize() {
            Some(target) => self.free_before(target),
            None => 0,
        }
    }

    fn free_before(&self, target: u64) -> usize {
        let pending = core::mem::take(&mut *self.retired.borrow_mut());
        let mut kept = Vec::new();
        let mut freed = 0;
        for (epoch, retired) in pending {
            if epoch < target {
                // SAFETY: retired in `epoch`, and every reader from an epoch
                // before `target` has exited.
                unsafe { retired.reclaim() };
                freed += 1;
            } else {
                kept.push((epoch, retired));
            }
        }
        trace!(index = self.index, freed, kept = kept.len(), "rcu reclaim");
        self.retired.borrow_mut().extend(kept);
        freed
    }

    /// Number of nodes waiting for a grace period.
    pub fn retired_count(&self) -> usize {
        self.retired.borrow().len()
    }
}

impl Drop for RcuHandle {
    fn drop(&mut self) {
        if self.in_read_section() {
            self.depth.set(0);
            self.record().epoch.store(QUIESCENT, Ordering::Release);
        }
        let mut freed = 0;
        while self.retired_count() > 0 {
            freed += self.reclaim();
        }
        self.record().active.store(false, Ordering::Release);
        let registered = self.rcu.state.registered.fetch_sub(1, Ordering::AcqRel) - 1;
        debug!(index = self.index, registered, freed, "rcu thread deregistered");
    }
}

impl core::fmt::Debug for RcuHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RcuHandle")
            .field("index", &self.index)
            .field("depth", &self.depth.get())
            .field("retired", &self.retired_count())
            .finish()
    }
}

impl ReclaimHandle for RcuHandle {
    type Domain = Rcu;
    type Guard<'h> = RcuGuard<'h>;

    fn domain(&self) -> &Rcu {
        &self.rcu
    }

    fn pin(&self) -> RcuGuard<'_> {
        RcuHandle::pin(self)
    }
}

/// RAII read-side critical section over an [`RcuHandle`].
pub struct RcuGuard<'h> {
    handle: &'h RcuHandle,
}

impl RcuGuard<'_> {
    /// The handle this guard was opened on.
    pub fn handle(&self) -> &RcuHandle {
        self.handle
    }
}

impl Drop for RcuGuard<'_> {
    fn drop(&mut self) {
        self.handle.read_unlock();
    }
}

impl Protect for RcuGuard<'_> {
    #[inline]
    fn protect<T>(&self, _slot: usize, src: &AtomicPtr<T>) -> *mut T {
        src.load(Ordering::Acquire)
    }

    #[inline]
    fn protect_ptr<T>(&self, _slot: usize, _ptr: *mut T) {}

    #[inline]
    fn clear(&self, _slot: usize) {}

    #[inline]
    unsafe fn retire<T: Send>(&self, ptr: *mut T) {
        unsafe { self.handle.retire(ptr) }
    }
}
