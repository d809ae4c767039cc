//! Per-fault probabilities for buggify

use super::faults;
use std::collections::HashMap;

/// Fault probabilities keyed by fault id
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Master switch; when false nothing triggers
    pub enabled: bool,
    /// Multiplier applied to every configured probability
    pub global_multiplier: f64,
    probabilities: HashMap<String, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultConfig {
    /// Enabled, with no per-fault probabilities configured
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            global_multiplier: 1.0,
            probabilities: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            ..Self::new()
        }
    }

    /// Roughly 1% failure on every queue call
    pub fn moderate() -> Self {
        let mut config = Self::new();
        for fault in faults::ALL_FAULTS {
            config.set(fault, 0.01);
        }
        config
    }

    pub fn chaos() -> Self {
        let mut config = Self::new();
        for fault in faults::ALL_FAULTS {
            config.set(fault, 0.10);
        }
        config
    }

    pub fn set(&mut self, fault_id: &str, probability: f64) {
        self.probabilities
            .insert(fault_id.to_string(), probability.clamp(0.0, 1.0));
    }

    pub fn with(mut self, fault_id: &str, probability: f64) -> Self {
        self.set(fault_id, probability);
        self
    }

    /// Effective probability for a fault id (0.0 when unset or disabled)
    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        let base = self.probabilities.get(fault_id).copied().unwrap_or(0.0);
        (base * self.global_multiplier).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_zero() {
        let config = FaultConfig::disabled().with(faults::queue::ADD_FAIL, 1.0);
        assert_eq!(config.get(faults::queue::ADD_FAIL), 0.0);
    }

    #[test]
    fn test_multiplier_clamped() {
        let mut config = FaultConfig::chaos();
        config.global_multiplier = 100.0;
        assert_eq!(config.get(faults::queue::LEASE_FAIL), 1.0);
        assert_eq!(config.get("unknown.fault"), 0.0);
    }
}
