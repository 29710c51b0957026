//! Engine tuning
//!
//! Deserialized from the `[engine]` table of the service config file; every
//! field has a default so a missing table is fine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-unit time limit in seconds
pub const DEFAULT_UNIT_TIMEOUT_SECS: f64 = 300.0;

/// Default event bus capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size; 0 means available parallelism
    pub max_workers: usize,
    /// Per-unit time limit in seconds (fractions allowed); 0 disables it
    pub unit_timeout_secs: f64,
    /// Buffered events per subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: 0,
            unit_timeout_secs: DEFAULT_UNIT_TIMEOUT_SECS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Effective worker count (never zero)
    pub fn worker_count(&self) -> usize {
        if self.max_workers > 0 {
            return self.max_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_secs.is_finite() && self.unit_timeout_secs > 0.0)
            .then(|| Duration::from_secs_f64(self.unit_timeout_secs))
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.unit_timeout_secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.worker_count() >= 1);
        assert_eq!(config.unit_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.event_capacity, 1000);
    }

    #[test]
    fn test_explicit_values() {
        let config = EngineConfig::default()
            .with_max_workers(3)
            .with_unit_timeout(None);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.unit_timeout(), None);

        let short = EngineConfig::default().with_unit_timeout(Some(Duration::from_millis(250)));
        assert_eq!(short.unit_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_partial_table_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "max_workers": 2, "unit_timeout_secs": 0 }"#).unwrap();
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.unit_timeout(), None);
        assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    }
}
