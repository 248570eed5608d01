//! Engine configuration.

use std::time::Duration;

/// Configuration for the computed cache and live subscriptions.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Quiescence interval between an invalidation and the automatic
    /// recomputation of a live state. Bursts of invalidations within this
    /// window collapse into one refresh.
    pub update_delay: Duration,
    /// Capacity of the invalidation broadcast channel. A lagging live
    /// state that misses events falls back to a full refresh.
    pub invalidation_channel_capacity: usize,
    /// Upper bound on nodes visited by a single invalidation pass.
    /// Traversal stops (with a warning) past this, rather than looping on
    /// a pathologically dense graph.
    pub max_invalidation_visits: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_delay: Duration::from_millis(100),
            invalidation_channel_capacity: 256,
            max_invalidation_visits: 100_000,
        }
    }
}

impl EngineConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the update delay.
    pub fn with_update_delay(mut self, delay: Duration) -> Self {
        self.update_delay = delay;
        self
    }

    /// Set the invalidation channel capacity.
    pub fn with_invalidation_channel_capacity(mut self, capacity: usize) -> Self {
        self.invalidation_channel_capacity = capacity;
        self
    }

    /// Set the invalidation visit bound.
    pub fn with_max_invalidation_visits(mut self, max: usize) -> Self {
        self.max_invalidation_visits = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_update_delay(Duration::from_millis(50))
            .with_invalidation_channel_capacity(64)
            .with_max_invalidation_visits(1000);

        assert_eq!(config.update_delay, Duration::from_millis(50));
        assert_eq!(config.invalidation_channel_capacity, 64);
        assert_eq!(config.max_invalidation_visits, 1000);
    }

    #[test]
    fn test_default_update_delay() {
        assert_eq!(EngineConfig::default().update_delay, Duration::from_millis(100));
    }
}
