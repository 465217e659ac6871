//! Admission control for pooled engine sessions.
//!
//! Every pooled session holds a [`PoolSlot`]; native sessions don't count.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::AnalysisError;

/// Each engine instance carries its own hash table and search threads.
pub const DEFAULT_POOL_CEILING: usize = 4;

#[derive(Debug)]
pub struct PoolGovernor {
    live: AtomicUsize,
    ceiling: usize,
}

impl Default for PoolGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CEILING)
    }
}

impl PoolGovernor {
    pub fn new(ceiling: usize) -> Self {
        Self {
            live: AtomicUsize::new(0),
            ceiling,
        }
    }

    /// Governor sized by `ENGINE_POOL_CEILING`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.pool_ceiling)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn active_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn can_create_instance(&self) -> bool {
        self.active_count() < self.ceiling
    }

    /// Claim a slot. Check and increment happen in one atomic step.
    pub fn admit(self: &Arc<Self>) -> Result<PoolSlot, AnalysisError> {
        let ceiling = self.ceiling;
        match self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                (live < ceiling).then_some(live + 1)
            }) {
            Ok(previous) => {
                debug!(active = previous + 1, ceiling, "Pool slot admitted");
                Ok(PoolSlot {
                    governor: Arc::clone(self),
                    released: false,
                })
            }
            Err(active) => Err(AnalysisError::PoolExhausted { active, ceiling }),
        }
    }

    fn release_one(&self) {
        // Never wraps below zero even if a slot were somehow released twice
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| live.checked_sub(1));
        debug!(active = self.active_count(), "Pool slot released");
    }
}

/// One admitted instance. Released on [`PoolSlot::release`] or drop, whichever comes first.
#[derive(Debug)]
pub struct PoolSlot {
    governor: Arc<PoolGovernor>,
    released: bool,
}

impl PoolSlot {
    /// Returns `true` only for the call that actually gave the slot back.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.governor.release_one();
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.release();
    }
}
