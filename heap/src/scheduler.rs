//! Heap-pressure bookkeeping that decides when a collection should be
//! requested. Mutators feed it allocation sizes and safepoint weights;
//! crossing a budget reports "trigger" exactly once per budget window.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy)]
pub struct GcSchedulerConfig {
    /// Bytes a thread may allocate before requesting a collection.
    pub allocation_threshold: usize,
    /// Approximate instruction budget between requested collections.
    pub weight_threshold: u64,
    /// Disable to make collections purely explicit (benches, tests).
    pub auto_trigger: bool,
}

impl Default for GcSchedulerConfig {
    fn default() -> Self {
        Self {
            allocation_threshold: 8 * 1024 * 1024,
            weight_threshold: 1 << 22,
            auto_trigger: true,
        }
    }
}

/// Per-thread budget counters.
#[derive(Debug)]
pub struct SchedulerTick {
    config: GcSchedulerConfig,
    allocated: AtomicUsize,
    weight: AtomicU64,
}

impl SchedulerTick {
    pub fn new(config: GcSchedulerConfig) -> Self {
        Self {
            config,
            allocated: AtomicUsize::new(0),
            weight: AtomicU64::new(0),
        }
    }

    /// Accounts an upcoming allocation; true means a collection should be
    /// requested now.
    pub fn on_allocation(&self, size: usize) -> bool {
        if !self.config.auto_trigger {
            return false;
        }
        let total = self.allocated.fetch_add(size, Ordering::Relaxed) + size;
        if total >= self.config.allocation_threshold {
            self.allocated.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Accounts safepoint poll weight; true means a collection should be
    /// requested now.
    pub fn on_safepoint(&self, weight: u64) -> bool {
        if !self.config.auto_trigger {
            return false;
        }
        let total = self.weight.fetch_add(weight, Ordering::Relaxed) + weight;
        if total >= self.config.weight_threshold {
            self.weight.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn reset(&self) {
        self.allocated.store(0, Ordering::Relaxed);
        self.weight.store(0, Ordering::Relaxed);
    }
}
