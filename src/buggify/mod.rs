//! BUGGIFY - Deterministic Fault Injection
//!
//! Every queue call in simulation passes through a named decision point.
//! With the same seed, faults fire at the same points, so a failing DST
//! seed replays exactly.
//!
//! # Usage
//!
//! ```ignore
//! if buggify!(&mut rng, faults::queue::LEASE_FAIL) {
//!     return Err(QueueError::Unavailable("simulated lease failure".into()));
//! }
//!
//! // With an explicit probability
//! if buggify!(&mut rng, faults::queue::TIMEOUT, 0.05) {
//!     return Err(QueueError::Unavailable("simulated timeout".into()));
//! }
//! ```

pub mod config;
pub mod faults;

pub use config::FaultConfig;
pub use faults::ALL_FAULTS;

use crate::simulator::Rng;
use std::cell::RefCell;
use std::collections::HashMap;

/// Statistics tracking for fault injection
#[derive(Debug, Clone, Default)]
pub struct BuggifyStats {
    /// Number of times each fault was checked
    pub checks: HashMap<String, u64>,
    /// Number of times each fault was triggered
    pub triggers: HashMap<String, u64>,
}

impl BuggifyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_check(&mut self, fault_id: &str) {
        *self.checks.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn record_trigger(&mut self, fault_id: &str) {
        *self.triggers.entry(fault_id.to_string()).or_insert(0) += 1;
    }

    pub fn trigger_rate(&self, fault_id: &str) -> f64 {
        let checks = self.checks.get(fault_id).copied().unwrap_or(0);
        let triggers = self.triggers.get(fault_id).copied().unwrap_or(0);
        if checks == 0 {
            0.0
        } else {
            triggers as f64 / checks as f64
        }
    }

    pub fn summary(&self) -> String {
        let mut lines = vec!["BUGGIFY Statistics:".to_string()];

        let mut sorted_faults: Vec<_> = self.checks.keys().collect();
        sorted_faults.sort();

        for fault_id in sorted_faults {
            let checks = self.checks.get(fault_id).copied().unwrap_or(0);
            let triggers = self.triggers.get(fault_id).copied().unwrap_or(0);
            lines.push(format!(
                "  {}: {}/{} ({:.2}%)",
                fault_id,
                triggers,
                checks,
                self.trigger_rate(fault_id) * 100.0
            ));
        }

        lines.join("\n")
    }
}

thread_local! {
    static BUGGIFY_CONTEXT: RefCell<BuggifyContext> = RefCell::new(BuggifyContext::default());
}

/// Per-thread buggify context
#[derive(Debug, Default)]
pub struct BuggifyContext {
    pub config: FaultConfig,
    pub stats: BuggifyStats,
    /// When true, all buggify calls return false
    pub suppressed: bool,
}

/// Set the buggify configuration for the current thread
pub fn set_config(config: FaultConfig) {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().config = config;
    });
}

/// Get current buggify stats for the thread
pub fn get_stats() -> BuggifyStats {
    BUGGIFY_CONTEXT.with(|ctx| ctx.borrow().stats.clone())
}

/// Reset stats for the current thread
pub fn reset_stats() {
    BUGGIFY_CONTEXT.with(|ctx| {
        ctx.borrow_mut().stats = BuggifyStats::new();
    });
}

/// Suppresses buggify until dropped
pub struct BuggifySuppressor;

impl BuggifySuppressor {
    pub fn new() -> Self {
        BUGGIFY_CONTEXT.with(|ctx| {
            ctx.borrow_mut().suppressed = true;
        });
        BuggifySuppressor
    }
}

impl Default for BuggifySuppressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BuggifySuppressor {
    fn drop(&mut self) {
        BUGGIFY_CONTEXT.with(|ctx| {
            ctx.borrow_mut().suppressed = false;
        });
    }
}

/// Check a fault using the thread's configured probability
#[inline]
pub fn should_buggify<R: Rng>(rng: &mut R, fault_id: &str) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.stats.record_check(fault_id);

        if ctx.suppressed {
            return false;
        }

        let prob = ctx.config.get(fault_id);
        if prob <= 0.0 {
            return false;
        }

        let triggered = roll(rng) < prob;
        if triggered {
            ctx.stats.record_trigger(fault_id);
        }
        triggered
    })
}

/// Check a fault with an explicit probability
#[inline]
pub fn should_buggify_with_prob<R: Rng>(rng: &mut R, fault_id: &str, probability: f64) -> bool {
    BUGGIFY_CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        ctx.stats.record_check(fault_id);

        if ctx.suppressed || !ctx.config.enabled {
            return false;
        }

        // Always draw so the RNG stream does not depend on the probability
        let triggered = roll(rng) < probability.clamp(0.0, 1.0);
        if triggered {
            ctx.stats.record_trigger(fault_id);
        }
        triggered
    })
}

fn roll<R: Rng>(rng: &mut R) -> f64 {
    rng.gen_range(0, 1_000_000) as f64 / 1_000_000.0
}

/// BUGGIFY macro - the main interface for fault injection
#[macro_export]
macro_rules! buggify {
    ($rng:expr, $fault_id:expr) => {
        $crate::buggify::should_buggify($rng, $fault_id)
    };
    ($rng:expr, $fault_id:expr, $prob:expr) => {
        $crate::buggify::should_buggify_with_prob($rng, $fault_id, $prob)
    };
}

/// Suppress all buggify calls within a scope
#[macro_export]
macro_rules! suppress_buggify {
    () => {
        $crate::buggify::BuggifySuppressor::new()
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::DeterministicRng;

    #[test]
    fn test_buggify_disabled() {
        set_config(FaultConfig::disabled());
        let mut rng = DeterministicRng::new(0);

        for _ in 0..1000 {
            assert!(!buggify!(&mut rng, faults::queue::ADD_FAIL));
            assert!(!buggify!(&mut rng, faults::queue::ADD_FAIL, 1.0));
        }
    }

    #[test]
    fn test_buggify_with_prob() {
        set_config(FaultConfig::new());
        let mut rng = DeterministicRng::new(1);

        assert!((0..100).all(|_| buggify!(&mut rng, "test.always", 1.0)));
        assert!((0..100).all(|_| !buggify!(&mut rng, "test.never", 0.0)));
    }

    #[test]
    fn test_buggify_stats() {
        reset_stats();
        set_config(FaultConfig::moderate());
        let mut rng = DeterministicRng::new(42);

        for _ in 0..1000 {
            let _ = buggify!(&mut rng, faults::queue::LEASE_FAIL);
        }

        let stats = get_stats();
        assert_eq!(stats.checks.get(faults::queue::LEASE_FAIL), Some(&1000));
        let triggers = stats
            .triggers
            .get(faults::queue::LEASE_FAIL)
            .copied()
            .unwrap_or(0);
        assert!(triggers > 0 && triggers < 100, "triggers: {}", triggers);
        assert!(stats.summary().contains(faults::queue::LEASE_FAIL));
    }

    #[test]
    fn test_buggify_suppression() {
        set_config(FaultConfig::new());
        let mut rng = DeterministicRng::new(5);

        {
            let _guard = suppress_buggify!();
            for _ in 0..100 {
                assert!(!buggify!(&mut rng, faults::queue::DELETE_FAIL, 1.0));
            }
        }

        assert!(buggify!(&mut rng, "test.after_suppress", 1.0));
    }

    #[test]
    fn test_same_seed_same_faults() {
        set_config(FaultConfig::new());
        let mut a = DeterministicRng::new(99);
        let mut b = DeterministicRng::new(99);

        let run_a: Vec<bool> = (0..200).map(|_| buggify!(&mut a, "test.det", 0.3)).collect();
        let run_b: Vec<bool> = (0..200).map(|_| buggify!(&mut b, "test.det", 0.3)).collect();
        assert_eq!(run_a, run_b);
    }
}
