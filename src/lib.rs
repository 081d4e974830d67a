//! Haven: safe memory reclamation for lock-free data structures.
//!
//! Two interchangeable reclamation strategies, both behind the [`Reclaim`]
//! capability so that a structure can be built against either one:
//!
//! - **Hazard pointers** ([`HazardDomain`]): readers publish the exact nodes
//!   they are about to dereference; retired nodes are freed by a scan that
//!   finds them unpublished. Readers never block and memory stays bounded by
//!   `threads × slots` plus the scan threshold.
//! - **Single-writer RCU** ([`Rcu`]): readers announce the epoch they entered
//!   in; one writer at a time advances the epoch and waits out a grace
//!   period before freeing. Reads cost one store on entry and one on exit.
//!
//! Domains are explicit values. Create one, share it by cloning, and register
//! every participating thread before its first operation.
//!
//! # Example
//!
//! ```rust
//! use std::ptr;
//! use std::sync::atomic::{AtomicPtr, Ordering};
//! use haven::{HazardDomain, Protect};
//!
//! let domain = HazardDomain::with_defaults();
//! let handle = domain.register().unwrap();
//!
//! let shared = AtomicPtr::new(Box::into_raw(Box::new(42)));
//!
//! let guard = handle.pin();
//! let ptr = guard.protect(0, &shared);
//! assert_eq!(unsafe { *ptr }, 42);
//!
//! // Unlink, then retire: the node is freed once no slot names it.
//! let old = shared.swap(ptr::null_mut(), Ordering::AcqRel);
//! unsafe { guard.retire(old) };
//! drop(guard);
//! handle.scan();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod hazard;
pub mod node;
pub mod rcu;
mod reclaim;
mod retired;

pub use config::{HazardConfig, RcuConfig};
pub use error::{ReclaimError, Result};
pub use hazard::{HazardDomain, HazardGuard, HazardHandle};
pub use node::Node;
pub use rcu::{Rcu, RcuCell, RcuGuard, RcuHandle, RcuRef};
pub use reclaim::{Protect, Reclaim, ReclaimHandle};

// Re-export for convenience
pub use core::sync::atomic::Ordering;
