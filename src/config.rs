//! Tunables for the hazard-pointer and RCU domains.
//!
//! Both configurations are plain `Copy` values produced by a validating
//! builder. A domain copies its configuration at construction; there is no
//! global or environment-driven state.

use crate::error::{ReclaimError, Result};
use core::time::Duration;

/// Default number of thread records per domain.
pub const DEFAULT_MAX_THREADS: usize = 128;

/// Default number of hazard slots per thread.
pub const DEFAULT_SLOTS_PER_THREAD: usize = 4;

/// Fewest hazard slots a thread may have. The optimistic queue walks the
/// list hand-over-hand and holds three slots at once.
pub const MIN_SLOTS_PER_THREAD: usize = 3;

/// Most hazard slots a thread may have (held slots are tracked in a `u64`).
pub const MAX_SLOTS_PER_THREAD: usize = 64;

/// Multiplier applied to `slots × registered threads` for the default scan
/// threshold.
pub const SCAN_FACTOR: usize = 2;

/// Default retire-list length that triggers RCU reclamation.
pub const DEFAULT_RECLAIM_THRESHOLD: usize = 64;

/// Default sleep between grace-period polls once spinning is exhausted.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Configuration of a [`HazardDomain`](crate::hazard::HazardDomain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HazardConfig {
    max_threads: usize,
    slots_per_thread: usize,
    scan_threshold: Option<usize>,
}

impl Default for HazardConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            slots_per_thread: DEFAULT_SLOTS_PER_THREAD,
            scan_threshold: None,
        }
    }
}

impl HazardConfig {
    /// Starts a builder from the defaults.
    pub fn builder() -> HazardConfigBuilder {
        HazardConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of thread records.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Number of hazard slots per thread record.
    pub fn slots_per_thread(&self) -> usize {
        self.slots_per_thread
    }

    /// Fixed scan threshold, if one was configured.
    pub fn scan_threshold(&self) -> Option<usize> {
        self.scan_threshold
    }

    /// Retire-list length above which a thread scans, given the number of
    /// currently registered threads.
    pub(crate) fn scan_threshold_for(&self, registered: usize) -> usize {
        self.scan_threshold
            .unwrap_or(SCAN_FACTOR * self.slots_per_thread * registered.max(1))
    }
}

/// Builder for [`HazardConfig`].
#[derive(Debug, Clone)]
pub struct HazardConfigBuilder {
    config: HazardConfig,
}

impl HazardConfigBuilder {
    /// Sets the number of thread records.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.config.max_threads = max_threads;
        self
    }

    /// Sets the number of hazard slots per thread.
    pub fn slots_per_thread(mut self, slots: usize) -> Self {
        self.config.slots_per_thread = slots;
        self
    }

    /// Pins the scan threshold instead of deriving it from the thread count.
    pub fn scan_threshold(mut self, threshold: usize) -> Self {
        self.config.scan_threshold = Some(threshold);
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<HazardConfig> {
        let config = self.config;
        if config.max_threads == 0 {
            return Err(invalid("max_threads", "must be at least 1".into()));
        }
        if !(MIN_SLOTS_PER_THREAD..=MAX_SLOTS_PER_THREAD).contains(&config.slots_per_thread) {
            return Err(invalid(
                "slots_per_thread",
                format!(
                    "{} is outside {MIN_SLOTS_PER_THREAD}..={MAX_SLOTS_PER_THREAD}",
                    config.slots_per_thread
                ),
            ));
        }
        if config.scan_threshold == Some(0) {
            return Err(invalid("scan_threshold", "must be at least 1".into()));
        }
        Ok(config)
    }
}

/// Configuration of an [`Rcu`](crate::rcu::Rcu) domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RcuConfig {
    max_threads: usize,
    reclaim_threshold: usize,
    poll_interval: Duration,
}

impl Default for RcuConfig {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            reclaim_threshold: DEFAULT_RECLAIM_THRESHOLD,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl RcuConfig {
    /// Starts a builder from the defaults.
    pub fn builder() -> RcuConfigBuilder {
        RcuConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of reader records.
    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    /// Retire-list length that triggers reclamation.
    pub fn reclaim_threshold(&self) -> usize {
        self.reclaim_threshold
    }

    /// Sleep between grace-period polls.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Builder for [`RcuConfig`].
#[derive(Debug, Clone)]
pub struct RcuConfigBuilder {
    config: RcuConfig,
}

impl RcuConfigBuilder {
    /// Sets the number of reader records.
    pub fn max_threads(mut self, max_threads: usize) -> Self {
        self.config.max_threads = max_threads;
        self
    }

    /// Sets the retire-list length that triggers reclamation.
    pub fn reclaim_threshold(mut self, threshold: usize) -> Self {
        self.config.reclaim_threshold = threshold;
        self
    }

    /// Sets the sleep between grace-period polls.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<RcuConfig> {
        let config = self.config;
        if config.max_threads == 0 {
            return Err(invalid("max_threads", "must be at least 1".into()));
        }
        if config.reclaim_threshold == 0 {
            return Err(invalid("reclaim_threshold", "must be at least 1".into()));
        }
        Ok(config)
    }
}

fn invalid(field: &'static str, reason: String) -> ReclaimError {
    ReclaimError::InvalidConfig { field, reason }
}
