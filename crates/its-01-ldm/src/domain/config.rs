//! LDM configuration.

use std::time::Duration;

/// Sizing and eviction parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdmConfig {
    /// Slots pre-filled into the free list.
    pub initial_size: usize,
    /// Hard cap on pool size. `None` lets the pool grow without bound.
    pub max_size: Option<usize>,
    /// Wake-up period of the eviction task. Zero disables eviction.
    pub eviction_period: Duration,
    /// Entries not written for longer than this are evicted.
    pub age_threshold: Duration,
}

impl Default for LdmConfig {
    fn default() -> Self {
        Self {
            initial_size: 1,
            max_size: None,
            eviction_period: Duration::from_secs(3),
            age_threshold: Duration::from_secs(5),
        }
    }
}

impl LdmConfig {
    /// Config for a pool of `initial_size` slots with default eviction.
    #[must_use]
    pub fn with_size(initial_size: usize) -> Self {
        Self {
            initial_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn eviction_enabled(&self) -> bool {
        !self.eviction_period.is_zero()
    }
}
