//! Lock-free collections for Haven.
//!
//! ## Collections
//!
//! - `TreiberStack`: LIFO stack with elimination backoff.
//! - `MsQueue`: Michael-Scott FIFO queue.
//! - `OptimisticMsQueue`: Michael-Scott queue with lazy tail advancement.
//!
//! Each collection is generic over a [`haven::Reclaim`] domain chosen at
//! construction; operations take the calling thread's handle.
//!
//! ## Usage
//!
//! ```rust
//! use haven::{HazardDomain, Rcu};
//! use haven_collections::{MsQueue, TreiberStack};
//!
//! let hazards = HazardDomain::with_defaults();
//! let handle = hazards.register().unwrap();
//! let stack = TreiberStack::new(hazards.clone());
//! stack.push(1, &handle);
//! stack.push(2, &handle);
//! assert_eq!(stack.pop(&handle), Some(2));
//!
//! let rcu = Rcu::with_defaults();
//! let reader = rcu.register().unwrap();
//! let queue = MsQueue::new(rcu.clone());
//! queue.enqueue("a", &reader);
//! assert_eq!(queue.dequeue(&reader), Some("a"));
//! assert_eq!(queue.dequeue(&reader), None);
//! ```

pub mod elimination;
pub mod ms_queue;
pub mod optimistic_ms_queue;
pub mod treiber_stack;

pub use ms_queue::MsQueue;
pub use optimistic_ms_queue::OptimisticMsQueue;
pub use treiber_stack::TreiberStack;

use haven::{Reclaim, ReclaimHandle};

/// Fails fast when `handle` was registered with another domain: its guards
/// would protect nodes against the wrong set of reclaimers.
#[inline]
#[track_caller]
pub(crate) fn check_domain<R: Reclaim>(domain: &R, handle: &R::Handle) {
    assert!(
        handle.domain().same_domain(domain),
        "handle belongs to a different reclamation domain than this collection"
    );
}
