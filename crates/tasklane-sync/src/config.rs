//! Engine configuration.

use std::time::Duration;

use tasklane_core::defaults::{
    EVENT_BUS_CAPACITY, MAX_PENDING_PER_KEY, REORDER_DEBOUNCE_MIN_MS, REORDER_DEBOUNCE_MS,
};

/// Tunables for the optimistic engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Quiescence window of the reorder coalescer in milliseconds.
    pub reorder_debounce_ms: u64,
    /// Capacity of the engine event broadcast channel.
    pub event_bus_capacity: usize,
    /// Maximum optimistic mutations stacked on one cache key.
    pub max_pending_per_key: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reorder_debounce_ms: REORDER_DEBOUNCE_MS,
            event_bus_capacity: EVENT_BUS_CAPACITY,
            max_pending_per_key: MAX_PENDING_PER_KEY,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TASKLANE_REORDER_DEBOUNCE_MS` | 500 | Reorder coalescing window |
    /// | `TASKLANE_EVENT_BUS_CAPACITY` | 256 | Engine event channel capacity |
    /// | `TASKLANE_MAX_PENDING_PER_KEY` | 64 | Pending mutations per cache key |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let reorder_debounce_ms = lookup("TASKLANE_REORDER_DEBOUNCE_MS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(REORDER_DEBOUNCE_MS)
            .max(REORDER_DEBOUNCE_MIN_MS);

        let event_bus_capacity = lookup("TASKLANE_EVENT_BUS_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(EVENT_BUS_CAPACITY)
            .max(1);

        let max_pending_per_key = lookup("TASKLANE_MAX_PENDING_PER_KEY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(MAX_PENDING_PER_KEY)
            .max(1);

        Self {
            reorder_debounce_ms,
            event_bus_capacity,
            max_pending_per_key,
        }
    }

    /// Set the reorder debounce window (clamped to the minimum).
    pub fn with_reorder_debounce(mut self, ms: u64) -> Self {
        self.reorder_debounce_ms = ms.max(REORDER_DEBOUNCE_MIN_MS);
        self
    }

    /// Set the event bus capacity.
    pub fn with_event_bus_capacity(mut self, capacity: usize) -> Self {
        self.event_bus_capacity = capacity.max(1);
        self
    }

    /// Set the pending mutation bound per cache key.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending_per_key = max.max(1);
        self
    }

    pub fn reorder_debounce(&self) -> Duration {
        Duration::from_millis(self.reorder_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.reorder_debounce_ms, 500);
        assert_eq!(config.event_bus_capacity, 256);
        assert_eq!(config.max_pending_per_key, 64);
        assert_eq!(config.reorder_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_engine_config_builder() {
        let config = EngineConfig::default()
            .with_reorder_debounce(250)
            .with_event_bus_capacity(16)
            .with_max_pending(4);
        assert_eq!(config.reorder_debounce_ms, 250);
        assert_eq!(config.event_bus_capacity, 16);
        assert_eq!(config.max_pending_per_key, 4);
    }

    #[test]
    fn test_engine_config_builder_clamps() {
        let config = EngineConfig::default()
            .with_reorder_debounce(0)
            .with_event_bus_capacity(0)
            .with_max_pending(0);
        assert_eq!(config.reorder_debounce_ms, REORDER_DEBOUNCE_MIN_MS);
        assert_eq!(config.event_bus_capacity, 1);
        assert_eq!(config.max_pending_per_key, 1);
    }

    #[test]
    fn test_from_lookup_reads_values() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("TASKLANE_REORDER_DEBOUNCE_MS", "300"),
            ("TASKLANE_EVENT_BUS_CAPACITY", " 64 "),
            ("TASKLANE_MAX_PENDING_PER_KEY", "8"),
        ]));
        assert_eq!(config.reorder_debounce_ms, 300);
        assert_eq!(config.event_bus_capacity, 64);
        assert_eq!(config.max_pending_per_key, 8);
    }

    #[test]
    fn test_from_lookup_invalid_values_fall_back() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("TASKLANE_REORDER_DEBOUNCE_MS", "soon"),
            ("TASKLANE_EVENT_BUS_CAPACITY", "-3"),
        ]));
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_from_lookup_clamps_tiny_debounce() {
        let config =
            EngineConfig::from_lookup(lookup_from(&[("TASKLANE_REORDER_DEBOUNCE_MS", "1")]));
        assert_eq!(config.reorder_debounce_ms, REORDER_DEBOUNCE_MIN_MS);
    }
}
