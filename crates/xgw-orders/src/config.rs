//! `[store]` configuration section.

use serde::{Deserialize, Serialize};

/// Order store tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long an out-of-order event waits for its predecessor.
    #[serde(default = "default_reorder_window_ms")]
    pub reorder_window_ms: u64,
    /// Maximum deferred events buffered per order.
    #[serde(default = "default_reorder_max_events")]
    pub reorder_max_events: usize,
    /// How long a drained terminal record stays queryable before eviction.
    #[serde(default = "default_evict_linger_ms")]
    pub evict_linger_ms: u64,
    /// Number of evicted order refs remembered to classify late events.
    #[serde(default = "default_evicted_memory")]
    pub evicted_memory: usize,
}

fn default_reorder_window_ms() -> u64 {
    250
}

fn default_reorder_max_events() -> usize {
    32
}

fn default_evict_linger_ms() -> u64 {
    5_000
}

fn default_evicted_memory() -> usize {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reorder_window_ms: default_reorder_window_ms(),
            reorder_max_events: default_reorder_max_events(),
            evict_linger_ms: default_evict_linger_ms(),
            evicted_memory: default_evicted_memory(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.reorder_max_events == 0 {
            return Err("store.reorder_max_events must be at least 1".to_string());
        }
        Ok(())
    }
}
