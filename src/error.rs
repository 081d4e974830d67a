//! Typed errors for domain construction and thread registration.

use thiserror::Error;

/// Errors surfaced by the reclamation domains.
///
/// Contention and empty structures are never errors: CAS failures are
/// retried internally and `pop`/`dequeue` report emptiness as `None`.
/// Protocol misuse (clearing an unheld hazard slot, unbalanced
/// `read_unlock`, mixing handles across domains) panics instead, since
/// continuing would break the reclamation invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReclaimError {
    /// Every thread record of the domain is taken by a live handle.
    #[error("registry is full: all {capacity} thread records are in use")]
    RegistryFull {
        /// Number of thread records the domain was built with.
        capacity: usize,
    },
    /// A configuration value is outside its accepted range.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfig {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReclaimError> = core::result::Result<T, E>;
