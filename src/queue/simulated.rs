//! Simulated Task Queue with Fault Injection
//!
//! DST wrapper that injects faults in front of another queue using buggify.
//! Every injected fault fires before the inner queue is touched, so a failed
//! call never has a side effect. That keeps the shadow state in DST exact.

use super::{LeasedTask, QueueError, QueueFuture, Task, TaskHandle, TaskQueue};
use crate::buggify::faults::queue as faults;
use crate::simulator::Rng;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedQueueConfig {
    pub add_fail_prob: f64,
    pub lease_fail_prob: f64,
    pub delete_fail_prob: f64,
    pub purge_fail_prob: f64,
    /// Probability of a call timing out before reaching the queue
    pub timeout_prob: f64,
    /// Probability of a lease returning fewer tasks than requested
    pub short_lease_prob: f64,
}

impl Default for SimulatedQueueConfig {
    fn default() -> Self {
        SimulatedQueueConfig {
            add_fail_prob: 0.01,     // 1%
            lease_fail_prob: 0.01,   // 1%
            delete_fail_prob: 0.01,  // 1%
            purge_fail_prob: 0.01,   // 1%
            timeout_prob: 0.005,     // 0.5%
            short_lease_prob: 0.05,  // 5%
        }
    }
}

impl SimulatedQueueConfig {
    /// High chaos configuration for stress testing
    pub fn high_chaos() -> Self {
        SimulatedQueueConfig {
            add_fail_prob: 0.05,
            lease_fail_prob: 0.05,
            delete_fail_prob: 0.10,
            purge_fail_prob: 0.05,
            timeout_prob: 0.02,
            short_lease_prob: 0.20,
        }
    }

    /// No faults - for baseline testing
    pub fn no_faults() -> Self {
        SimulatedQueueConfig {
            add_fail_prob: 0.0,
            lease_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            purge_fail_prob: 0.0,
            timeout_prob: 0.0,
            short_lease_prob: 0.0,
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulatedQueueStats {
    pub add_attempts: u64,
    pub add_failures: u64,
    pub lease_attempts: u64,
    pub lease_failures: u64,
    pub short_leases: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
    pub purge_attempts: u64,
    pub purge_failures: u64,
    pub timeouts: u64,
}

struct SimulatedQueueInner<R: Rng> {
    rng: R,
    stats: SimulatedQueueStats,
}

/// Simulated queue that wraps another queue and injects faults
pub struct SimulatedTaskQueue<Q: TaskQueue, R: Rng> {
    inner_queue: Q,
    config: SimulatedQueueConfig,
    state: Arc<Mutex<SimulatedQueueInner<R>>>,
}

impl<Q: TaskQueue, R: Rng> SimulatedTaskQueue<Q, R> {
    pub fn new(inner_queue: Q, rng: R, config: SimulatedQueueConfig) -> Self {
        SimulatedTaskQueue {
            inner_queue,
            config,
            state: Arc::new(Mutex::new(SimulatedQueueInner {
                rng,
                stats: SimulatedQueueStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &Q {
        &self.inner_queue
    }

    pub fn stats(&self) -> SimulatedQueueStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedQueueStats::default();
    }

    /// Roll the timeout and the operation-specific fault, in that order
    fn inject(
        &self,
        fault_id: &str,
        prob: f64,
        record: impl FnOnce(&mut SimulatedQueueStats),
    ) -> Result<(), QueueError> {
        let mut s = self.state.lock();
        let s = &mut *s;

        if crate::buggify!(&mut s.rng, faults::TIMEOUT, self.config.timeout_prob) {
            s.stats.timeouts += 1;
            return Err(QueueError::Unavailable("simulated timeout".to_string()));
        }
        if crate::buggify!(&mut s.rng, fault_id, prob) {
            record(&mut s.stats);
            return Err(QueueError::Unavailable(format!("simulated {}", fault_id)));
        }
        Ok(())
    }
}

impl<Q: TaskQueue, R: Rng> TaskQueue for SimulatedTaskQueue<Q, R> {
    fn add<'a>(&'a self, queue: &'a str, task: Task) -> QueueFuture<'a, TaskHandle> {
        Box::pin(async move {
            self.state.lock().stats.add_attempts += 1;
            self.inject(faults::ADD_FAIL, self.config.add_fail_prob, |s| {
                s.add_failures += 1
            })?;
            self.inner_queue.add(queue, task).await
        })
    }

    fn lease<'a>(
        &'a self,
        queue: &'a str,
        max_tasks: usize,
        visibility: Duration,
    ) -> QueueFuture<'a, Vec<LeasedTask>> {
        Box::pin(async move {
            self.state.lock().stats.lease_attempts += 1;
            self.inject(faults::LEASE_FAIL, self.config.lease_fail_prob, |s| {
                s.lease_failures += 1
            })?;

            let max_tasks = {
                let mut s = self.state.lock();
                let s = &mut *s;
                if max_tasks > 1
                    && crate::buggify!(
                        &mut s.rng,
                        faults::SHORT_LEASE,
                        self.config.short_lease_prob
                    )
                {
                    s.stats.short_leases += 1;
                    s.rng.gen_range(1, max_tasks as u64) as usize
                } else {
                    max_tasks
                }
            };

            self.inner_queue.lease(queue, max_tasks, visibility).await
        })
    }

    fn delete_multi<'a>(
        &'a self,
        queue: &'a str,
        handles: &'a [TaskHandle],
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().stats.delete_attempts += 1;
            self.inject(faults::DELETE_FAIL, self.config.delete_fail_prob, |s| {
                s.delete_failures += 1
            })?;
            self.inner_queue.delete_multi(queue, handles).await
        })
    }

    fn purge<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.state.lock().stats.purge_attempts += 1;
            self.inject(faults::PURGE_FAIL, self.config.purge_fail_prob, |s| {
                s.purge_failures += 1
            })?;
            self.inner_queue.purge(queue).await
        })
    }
}

impl<Q: TaskQueue + Clone, R: Rng> Clone for SimulatedTaskQueue<Q, R> {
    fn clone(&self) -> Self {
        SimulatedTaskQueue {
            inner_queue: self.inner_queue.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }
}
