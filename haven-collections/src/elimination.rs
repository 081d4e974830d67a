//! Elimination array for the Treiber stack.
//!
//! A push that keeps losing the head CAS may park its node in one of a few
//! exchange cells; a pop that keeps losing may take a parked node. A matched
//! pair completes without touching the head, and linearizes at the moment the
//! popper claims the cell: a push immediately followed by its pop.
//!
//! Cell states:
//!
//! - EMPTY: null.
//! - OFFERED: the pusher's node pointer.
//! - TAKEN: a sentinel address, set by the popper that claimed the offer.
//!
//! Only the pusher moves a cell out of TAKEN (back to EMPTY), and only the
//! popper that won the OFFERED → TAKEN CAS touches the node afterwards. The
//! node was never reachable from the head, so the popper frees it directly.

use core::cell::Cell;
use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use haven::Node;
use tracing::trace;

/// Default number of exchange cells.
pub const DEFAULT_WIDTH: usize = 8;

/// Number of polls a pusher waits on its offer before withdrawing it.
pub const EXCHANGE_SPINS: usize = 128;

/// Nodes are at least pointer-aligned, so address 1 is never a node.
const TAKEN: usize = 1;

#[inline]
fn taken<T>() -> *mut Node<T> {
    TAKEN as *mut Node<T>
}

thread_local! {
    static CELL_SEED: Cell<u64> = const { Cell::new(0) };
}

/// Per-thread xorshift stream used to spread threads across cells.
fn next_seed() -> u64 {
    CELL_SEED.with(|seed| {
        let mut x = seed.get();
        if x == 0 {
            // Address of the thread-local is distinct per live thread.
            x = (seed as *const Cell<u64> as u64) | 1;
        }
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        seed.set(x);
        x
    })
}

/// Fixed set of exchange cells pairing concurrent pushes with pops.
pub struct EliminationArray<T> {
    cells: Box<[CachePadded<AtomicPtr<Node<T>>>]>,
    exchanges: AtomicUsize,
}

// SAFETY: values cross threads only by ownership transfer through a cell.
unsafe impl<T: Send> Send for EliminationArray<T> {}
unsafe impl<T: Send> Sync for EliminationArray<T> {}

impl<T> EliminationArray<T> {
    /// Creates an array of `width` cells (at least one).
    pub fn new(width: usize) -> Self {
        Self {
            cells: (0..width.max(1))
                .map(|_| CachePadded::new(AtomicPtr::new(ptr::null_mut())))
                .collect(),
            exchanges: AtomicUsize::new(0),
        }
    }

    /// Number of cells.
    pub fn width(&self) -> usize {
        self.cells.len()
    }

    /// Number of push/pop pairs completed through the array.
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::Relaxed)
    }

    #[inline]
    fn pick(&self) -> &AtomicPtr<Node<T>> {
        &self.cells[(next_seed() % self.cells.len() as u64) as usize]
    }

    /// Parks `node` in a cell and waits briefly for a popper.
    ///
    /// Returns `true` when a popper took the node; ownership has passed to
    /// it. Returns `false` when the offer was withdrawn (or no cell was free)
    /// and the caller still owns `node`.
    pub fn offer(&self, node: *mut Node<T>) -> bool {
        let cell = self.pick();
        if cell
            .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        for _ in 0..EXCHANGE_SPINS {
            if cell.load(Ordering::Acquire) != node {
                break;
            }
            spin_loop();
        }

        match cell.compare_exchange(node, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => false,
            Err(current) => {
                debug_assert_eq!(current, taken::<T>());
                cell.store(ptr::null_mut(), Ordering::Release);
                true
            }
        }
    }

    /// Claims a parked node, if one is waiting in the chosen cell.
    pub fn take(&self) -> Option<T> {
        let cell = self.pick();
        let offered = cell.load(Ordering::Acquire);
        if offered.is_null() || offered == taken::<T>() {
            return None;
        }
        cell.compare_exchange(offered, taken::<T>(), Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;

        // SAFETY: winning OFFERED -> TAKEN transfers exclusive ownership of
        // the node; the pusher never touches it again and it was never linked
        // into the stack.
        let node = unsafe { Box::from_raw(offered) };
        let value = unsafe { node.take() };
        drop(node);

        let exchanges = self.exchanges.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(exchanges, "push/pop eliminated");
        Some(value)
    }
}

impl<T> core::fmt::Debug for EliminationArray<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EliminationArray")
            .field("width", &self.width())
            .field("exchanges", &self.exchanges())
            .finish()
    }
}
