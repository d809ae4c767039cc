//! Deterministic Simulation Testing for the delta counter
//!
//! Shadow-state harness that drives emitters and collectors against a
//! fault-injecting queue:
//! - Seeded workload of emits, collects, abandoned leases, clock jumps, purges
//! - Queue faults from `SimulatedTaskQueue`, collector crashes from buggify
//! - Conservation check after a final drain
//!
//! ## Design (FoundationDB-style DST with shadow state)
//!
//! ```text
//! for seed in 0..10000 {
//!     let harness = DeltaCounterDSTHarness::new(config(seed));
//!     harness.run(1000);
//!     harness.check_invariants();  // records violations with the seed
//! }
//! ```
//!
//! The shadow tracks every accepted emit. A collector that crashes after
//! applying but before committing is recorded as an expected overcount,
//! since its messages come back and are applied a second time.

use crate::buggify::{self, faults, FaultConfig};
use crate::clock::SimulatedClock;
use crate::config::CounterConfig;
use crate::counter::{AggregateMap, DeltaCounter, LeaseBatch, StringCodec};
use crate::error::CounterError;
use crate::queue::{
    InMemoryTaskQueue, SimulatedQueueConfig, SimulatedQueueStats, SimulatedTaskQueue, Task,
    TaskQueue,
};
use crate::simulator::{DeterministicRng, Rng};
use crate::store::{CounterStore, InMemoryCounterStore};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const DST_QUEUE: &str = "dst-deltas";

/// Configuration for counter DST
#[derive(Debug, Clone)]
pub struct DeltaCounterDSTConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Queue fault configuration
    pub queue_config: SimulatedQueueConfig,
    /// Collector settings (small batches so collects interleave)
    pub counter_config: CounterConfig,
    /// Distinct identifiers in the workload
    pub num_ids: u64,
    /// Share of emits that are decrements
    pub decrement_ratio: f64,
    pub collect_probability: f64,
    pub concurrent_collect_probability: f64,
    /// Lease, then walk away without applying or committing
    pub abandon_probability: f64,
    /// Jump the clock forward by up to twice the visibility timeout
    pub advance_probability: f64,
    pub purge_probability: f64,
    /// Enqueue a message with an unknown tag
    pub anomaly_probability: f64,
    /// Collector dies between apply and commit
    pub crash_probability: f64,
}

impl Default for DeltaCounterDSTConfig {
    fn default() -> Self {
        DeltaCounterDSTConfig {
            seed: 0,
            queue_config: SimulatedQueueConfig::default(),
            counter_config: CounterConfig::new(DST_QUEUE)
                .with_lease_batch_size(16)
                .with_visibility_timeout(Duration::from_secs(60)),
            num_ids: 12,
            decrement_ratio: 0.3,
            collect_probability: 0.12,
            concurrent_collect_probability: 0.03,
            abandon_probability: 0.03,
            advance_probability: 0.05,
            purge_probability: 0.005,
            anomaly_probability: 0.01,
            crash_probability: 0.02,
        }
    }
}

impl DeltaCounterDSTConfig {
    pub fn new(seed: u64) -> Self {
        DeltaCounterDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Calm mode - no queue faults, no crashes
    pub fn calm(seed: u64) -> Self {
        DeltaCounterDSTConfig {
            seed,
            queue_config: SimulatedQueueConfig::no_faults(),
            crash_probability: 0.0,
            ..Default::default()
        }
    }

    /// Moderate fault injection
    pub fn moderate(seed: u64) -> Self {
        DeltaCounterDSTConfig {
            seed,
            ..Default::default()
        }
    }

    /// Chaos mode - aggressive fault injection
    pub fn chaos(seed: u64) -> Self {
        DeltaCounterDSTConfig {
            seed,
            queue_config: SimulatedQueueConfig::high_chaos(),
            abandon_probability: 0.06,
            advance_probability: 0.08,
            purge_probability: 0.01,
            anomaly_probability: 0.03,
            crash_probability: 0.08,
            ..Default::default()
        }
    }
}

/// Counter operation type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterOperation {
    Increment { id: String },
    Decrement { id: String },
    /// Enqueue a message whose tag is neither "++" nor "--"
    EmitAnomaly { id: String },
    /// Lease, apply, commit
    CollectCommit,
    /// Two collectors lease side by side, each applies and commits its own batch
    ConcurrentCollect,
    /// Lease and drop the batch
    CollectAbandon,
    AdvanceClock { ms: u64 },
    Purge,
}

/// Outcome of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Success,
    /// Failed (expected under fault injection)
    Failed(String),
    /// Collector crashed after applying its aggregate
    Crashed,
}

/// Recorded operation for history tracking
#[derive(Debug, Clone)]
pub struct RecordedOperation {
    pub id: u64,
    pub operation: CounterOperation,
    pub outcome: OperationOutcome,
    pub clock_ms: u64,
}

/// Workload generator
pub struct CounterWorkload {
    rng: DeterministicRng,
    config: DeltaCounterDSTConfig,
}

impl CounterWorkload {
    pub fn new(config: DeltaCounterDSTConfig) -> Self {
        CounterWorkload {
            rng: DeterministicRng::new(config.seed),
            config,
        }
    }

    /// Generate the next operation
    pub fn next_operation(&mut self) -> CounterOperation {
        let c = &self.config;
        let roll = self.rng.next_u64() as f64 / u64::MAX as f64;
        let mut threshold = 0.0;

        threshold += c.purge_probability;
        if roll < threshold {
            return CounterOperation::Purge;
        }
        threshold += c.advance_probability;
        if roll < threshold {
            let visibility_ms = c.counter_config.visibility_timeout.as_millis() as u64;
            let ms = self.rng.gen_range(1, 2 * visibility_ms + 1);
            return CounterOperation::AdvanceClock { ms };
        }
        threshold += c.abandon_probability;
        if roll < threshold {
            return CounterOperation::CollectAbandon;
        }
        threshold += c.concurrent_collect_probability;
        if roll < threshold {
            return CounterOperation::ConcurrentCollect;
        }
        threshold += c.collect_probability;
        if roll < threshold {
            return CounterOperation::CollectCommit;
        }

        let id = format!("id-{:02}", self.rng.gen_range(0, c.num_ids));
        threshold += c.anomaly_probability;
        if roll < threshold {
            CounterOperation::EmitAnomaly { id }
        } else if self.rng.gen_bool(c.decrement_ratio) {
            CounterOperation::Decrement { id }
        } else {
            CounterOperation::Increment { id }
        }
    }

    /// Roll the collector-crash fault
    pub fn crash_now(&mut self) -> bool {
        crate::buggify!(
            &mut self.rng,
            faults::process::CRASH_BEFORE_COMMIT,
            self.config.crash_probability
        )
    }
}

/// Result of a DST run
#[derive(Debug, Clone, Serialize)]
pub struct DeltaCounterDSTResult {
    pub seed: u64,
    pub total_operations: u64,
    pub successful_operations: u64,
    /// Failed operations (expected under faults)
    pub failed_operations: u64,
    pub emits_accepted: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub crashes: u64,
    pub abandoned: u64,
    pub purges: u64,
    pub anomalies_pending: u64,
    /// Messages consumed by the final drain
    pub drained_messages: u64,
    pub queue_stats: SimulatedQueueStats,
    pub invariant_violations: Vec<String>,
    #[serde(skip)]
    pub history: Vec<RecordedOperation>,
}

impl DeltaCounterDSTResult {
    pub fn new(seed: u64) -> Self {
        DeltaCounterDSTResult {
            seed,
            total_operations: 0,
            successful_operations: 0,
            failed_operations: 0,
            emits_accepted: 0,
            commits: 0,
            commit_failures: 0,
            crashes: 0,
            abandoned: 0,
            purges: 0,
            anomalies_pending: 0,
            drained_messages: 0,
            queue_stats: SimulatedQueueStats::default(),
            invariant_violations: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.invariant_violations.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Seed {}: {} ops ({} ok, {} failed), {} emits, {} commits ({} failed), {} crashes, {} purges, {} violations",
            self.seed,
            self.total_operations,
            self.successful_operations,
            self.failed_operations,
            self.emits_accepted,
            self.commits,
            self.commit_failures,
            self.crashes,
            self.purges,
            self.invariant_violations.len()
        )
    }
}

/// Type alias for our simulated queue
type DSTQueue = SimulatedTaskQueue<InMemoryTaskQueue<SimulatedClock>, DeterministicRng>;

/// Main DST harness for the delta counter
pub struct DeltaCounterDSTHarness {
    config: DeltaCounterDSTConfig,
    clock: SimulatedClock,
    queue: Arc<DSTQueue>,
    inner_queue: InMemoryTaskQueue<SimulatedClock>,
    counter: DeltaCounter<DSTQueue>,
    store: InMemoryCounterStore<String>,
    workload: CounterWorkload,
    result: DeltaCounterDSTResult,
    /// Ground truth: net of every accepted emit since the last purge
    expected: HashMap<String, i64>,
    /// Deltas applied by crashed collectors, which will be applied again
    overcount: HashMap<String, i64>,
}

impl DeltaCounterDSTHarness {
    pub fn new(config: DeltaCounterDSTConfig) -> Result<Self, CounterError> {
        buggify::set_config(FaultConfig::new());

        let clock = SimulatedClock::new(0);
        let inner_queue = InMemoryTaskQueue::new(clock.clone());
        // Different seed for the queue
        let rng = DeterministicRng::new(config.seed.wrapping_add(1));
        let queue = Arc::new(SimulatedTaskQueue::new(
            inner_queue.clone(),
            rng,
            config.queue_config.clone(),
        ));
        let counter = DeltaCounter::new(queue.clone(), config.counter_config.clone())?;

        Ok(DeltaCounterDSTHarness {
            workload: CounterWorkload::new(config.clone()),
            result: DeltaCounterDSTResult::new(config.seed),
            config,
            clock,
            queue,
            inner_queue,
            counter,
            store: InMemoryCounterStore::new(),
            expected: HashMap::new(),
            overcount: HashMap::new(),
        })
    }

    /// Run the workload for a specified number of operations
    pub async fn run(&mut self, operations: usize) {
        for _ in 0..operations {
            let op = self.workload.next_operation();
            self.execute_operation(op).await;
        }
    }

    async fn execute_operation(&mut self, op: CounterOperation) {
        self.result.total_operations += 1;
        let op_id = self.result.total_operations;

        let outcome = match &op {
            CounterOperation::Increment { id } => self.execute_emit(id, 1).await,
            CounterOperation::Decrement { id } => self.execute_emit(id, -1).await,
            CounterOperation::EmitAnomaly { id } => self.execute_anomaly(id).await,
            CounterOperation::CollectCommit => self.execute_collect().await,
            CounterOperation::ConcurrentCollect => self.execute_concurrent_collect().await,
            CounterOperation::CollectAbandon => self.execute_abandon().await,
            CounterOperation::AdvanceClock { ms } => {
                self.clock.advance_ms(*ms);
                OperationOutcome::Success
            }
            CounterOperation::Purge => self.execute_purge().await,
        };

        match &outcome {
            OperationOutcome::Success => self.result.successful_operations += 1,
            OperationOutcome::Failed(_) => self.result.failed_operations += 1,
            OperationOutcome::Crashed => {
                self.result.successful_operations += 1;
                self.result.crashes += 1;
            }
        }

        self.result.history.push(RecordedOperation {
            id: op_id,
            operation: op,
            outcome,
            clock_ms: self.clock.current_ms(),
        });
    }

    async fn execute_emit(&mut self, id: &str, delta: i64) -> OperationOutcome {
        let sent = if delta > 0 {
            self.counter.increment_by_str(id).await
        } else {
            self.counter.decrement_by_str(id).await
        };
        match sent {
            Ok(()) => {
                *self.expected.entry(id.to_string()).or_insert(0) += delta;
                self.result.emits_accepted += 1;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_anomaly(&mut self, id: &str) -> OperationOutcome {
        match self
            .queue
            .add(DST_QUEUE, Task::pull(id.to_string(), "+-"))
            .await
        {
            Ok(_) => {
                self.result.anomalies_pending += 1;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_collect(&mut self) -> OperationOutcome {
        let (batch, map) = match self.counter.collect_delta_by_string().await {
            Ok(collected) => collected,
            Err(e) => return OperationOutcome::Failed(e.to_string()),
        };
        self.apply_and_commit(batch, map).await
    }

    async fn execute_concurrent_collect(&mut self) -> OperationOutcome {
        let first = self.counter.clone();
        let second = self.counter.clone();
        let (a, b) = tokio::join!(
            first.collect_delta_by_string(),
            second.collect_delta_by_string()
        );

        if let (Ok((batch_a, _)), Ok((batch_b, _))) = (&a, &b) {
            let names_a: BTreeSet<_> = batch_a.handles().iter().map(|h| &h.name).collect();
            if batch_b.handles().iter().any(|h| names_a.contains(&h.name)) {
                self.result
                    .invariant_violations
                    .push("concurrent leases overlap".to_string());
            }
        }

        let mut outcome = OperationOutcome::Success;
        for collected in [a, b] {
            let step = match collected {
                Ok((batch, map)) => self.apply_and_commit(batch, map).await,
                Err(e) => OperationOutcome::Failed(e.to_string()),
            };
            if outcome == OperationOutcome::Success {
                outcome = step;
            }
        }
        outcome
    }

    /// Apply to the store, then commit. A failed commit rolls the store back.
    async fn apply_and_commit(
        &mut self,
        batch: LeaseBatch,
        map: AggregateMap<String>,
    ) -> OperationOutcome {
        if map.is_empty() {
            return OperationOutcome::Success;
        }
        if let Err(e) = self.store.apply(&map).await {
            return OperationOutcome::Failed(e.to_string());
        }

        if self.workload.crash_now() {
            debug!(seed = self.config.seed, ids = map.len(), "collector crashed before commit");
            for (id, delta) in &map {
                *self.overcount.entry(id.clone()).or_insert(0) += delta;
            }
            return OperationOutcome::Crashed;
        }

        match self.counter.commit(&batch).await {
            Ok(()) => {
                self.result.commits += 1;
                OperationOutcome::Success
            }
            Err(e) => {
                // Injected faults fire before the queue is touched, so
                // nothing was deleted and the batch will come back.
                self.store.revert(&map);
                self.result.commit_failures += 1;
                OperationOutcome::Failed(e.to_string())
            }
        }
    }

    async fn execute_abandon(&mut self) -> OperationOutcome {
        match self.counter.collect_delta_raw().await {
            Ok((batch, _)) => {
                if !batch.is_empty() {
                    self.result.abandoned += 1;
                }
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    async fn execute_purge(&mut self) -> OperationOutcome {
        match self.counter.purge_async_count().await {
            Ok(()) => {
                // Only what was already applied survives a purge
                self.expected = self.store.snapshot();
                self.overcount.clear();
                self.result.anomalies_pending = 0;
                self.result.purges += 1;
                OperationOutcome::Success
            }
            Err(e) => OperationOutcome::Failed(e.to_string()),
        }
    }

    /// Drain everything without faults, then compare totals to the shadow
    pub async fn check_invariants(&mut self) {
        self.result.queue_stats = self.queue.stats();

        // Every outstanding lease lapses
        self.clock
            .advance(self.config.counter_config.visibility_timeout);

        let drain_config = self
            .config
            .counter_config
            .clone()
            .with_lease_batch_size(usize::MAX);
        let drainer = match DeltaCounter::new(Arc::new(self.inner_queue.clone()), drain_config) {
            Ok(drainer) => drainer,
            Err(e) => {
                self.result
                    .invariant_violations
                    .push(format!("cannot build drain collector: {}", e));
                return;
            }
        };

        match drainer.drain_into(&StringCodec, &self.store).await {
            Ok(report) => self.result.drained_messages = report.messages as u64,
            Err(e) => {
                self.result
                    .invariant_violations
                    .push(format!("fault-free drain failed: {}", e));
                return;
            }
        }

        // Invariant 1: applied == accepted (+ crash re-deliveries)
        let applied = self.store.snapshot();
        let ids: BTreeSet<&String> = applied
            .keys()
            .chain(self.expected.keys())
            .chain(self.overcount.keys())
            .collect();
        for id in ids {
            let want = self.expected.get(id).copied().unwrap_or(0)
                + self.overcount.get(id).copied().unwrap_or(0);
            let got = applied.get(id).copied().unwrap_or(0);
            if want != got {
                self.result.invariant_violations.push(format!(
                    "total for {} is {}, expected {}",
                    id, got, want
                ));
            }
        }

        // Invariant 2: only anomalous messages remain
        let remaining = self.inner_queue.len(DST_QUEUE) as u64;
        if remaining != self.result.anomalies_pending {
            self.result.invariant_violations.push(format!(
                "{} messages left after drain, {} anomalous",
                remaining, self.result.anomalies_pending
            ));
        }

        // Invariant 3: a drained queue stays drained
        self.clock
            .advance(self.config.counter_config.visibility_timeout);
        match drainer.collect_delta_by_string().await {
            Ok((_, map)) if map.is_empty() => {}
            Ok((_, map)) => self.result.invariant_violations.push(format!(
                "second drain returned {} identifiers",
                map.len()
            )),
            Err(e) => self
                .result
                .invariant_violations
                .push(format!("second drain failed: {}", e)),
        }

        if !self.result.is_success() {
            warn!(
                seed = self.config.seed,
                violations = self.result.invariant_violations.len(),
                "invariant violated"
            );
        }
    }

    pub fn result(&self) -> &DeltaCounterDSTResult {
        &self.result
    }

    pub fn into_result(self) -> DeltaCounterDSTResult {
        self.result
    }
}

/// Run a batch of DST runs with consecutive seeds
pub async fn run_dst_batch(
    base_seed: u64,
    count: usize,
    ops_per_run: usize,
    config_fn: impl Fn(u64) -> DeltaCounterDSTConfig,
) -> Vec<DeltaCounterDSTResult> {
    let mut results = Vec::with_capacity(count);

    for i in 0..count {
        let seed = base_seed + i as u64;
        let mut harness = match DeltaCounterDSTHarness::new(config_fn(seed)) {
            Ok(harness) => harness,
            Err(e) => {
                let mut result = DeltaCounterDSTResult::new(seed);
                result
                    .invariant_violations
                    .push(format!("invalid configuration: {}", e));
                results.push(result);
                continue;
            }
        };
        harness.run(ops_per_run).await;
        harness.check_invariants().await;

        results.push(harness.into_result());
    }

    results
}

/// Summary of batch results
pub fn summarize_batch(results: &[DeltaCounterDSTResult]) -> String {
    let total = results.len();
    let passed = results.iter().filter(|r| r.is_success()).count();
    let failed_seeds: Vec<u64> = results
        .iter()
        .filter(|r| !r.is_success())
        .map(|r| r.seed)
        .collect();

    let total_ops: u64 = results.iter().map(|r| r.total_operations).sum();
    let total_commits: u64 = results.iter().map(|r| r.commits).sum();
    let total_crashes: u64 = results.iter().map(|r| r.crashes).sum();

    let mut summary = format!(
        "Batch: {}/{} passed, {} total ops, {} commits, {} crashes",
        passed, total, total_ops, total_commits, total_crashes
    );

    if !failed_seeds.is_empty() {
        summary.push_str(&format!("\nFailed seeds: {:?}", failed_seeds));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dst_harness_calm() {
        let mut harness = DeltaCounterDSTHarness::new(DeltaCounterDSTConfig::calm(42)).unwrap();

        harness.run(300).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "Calm mode should not have invariant violations: {:?}",
            result.invariant_violations
        );
        assert_eq!(result.failed_operations, 0);
        assert_eq!(result.crashes, 0);
        assert!(result.commits > 0);
    }

    #[tokio::test]
    async fn test_dst_harness_with_faults() {
        let mut harness =
            DeltaCounterDSTHarness::new(DeltaCounterDSTConfig::moderate(123)).unwrap();

        harness.run(500).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(
            result.is_success(),
            "{}: {:?}",
            result.summary(),
            result.invariant_violations
        );
    }

    #[tokio::test]
    async fn test_dst_deterministic() {
        let seed = 12345;

        let mut harness1 = DeltaCounterDSTHarness::new(DeltaCounterDSTConfig::chaos(seed)).unwrap();
        harness1.run(200).await;
        let r1 = harness1.into_result();

        let mut harness2 = DeltaCounterDSTHarness::new(DeltaCounterDSTConfig::chaos(seed)).unwrap();
        harness2.run(200).await;
        let r2 = harness2.into_result();

        assert_eq!(r1.successful_operations, r2.successful_operations);
        assert_eq!(r1.commits, r2.commits);
        assert_eq!(r1.crashes, r2.crashes);
        let ops1: Vec<_> = r1.history.iter().map(|h| h.operation.clone()).collect();
        let ops2: Vec<_> = r2.history.iter().map(|h| h.operation.clone()).collect();
        assert_eq!(ops1, ops2, "Same seed should produce same workload");
    }

    #[tokio::test]
    async fn test_crash_redelivery_is_accounted() {
        let mut config = DeltaCounterDSTConfig::calm(7);
        config.crash_probability = 0.5;
        config.collect_probability = 0.3;

        let mut harness = DeltaCounterDSTHarness::new(config).unwrap();
        harness.run(300).await;
        harness.check_invariants().await;

        let result = harness.result();
        assert!(result.crashes > 0, "Should have some crashes");
        assert!(result.is_success(), "{:?}", result.invariant_violations);
    }

    #[test]
    fn test_workload_generator() {
        let mut workload = CounterWorkload::new(DeltaCounterDSTConfig::new(42));

        let mut emits = 0;
        let mut collects = 0;
        let mut other = 0;
        for _ in 0..2000 {
            match workload.next_operation() {
                CounterOperation::Increment { .. } | CounterOperation::Decrement { .. } => {
                    emits += 1
                }
                CounterOperation::CollectCommit | CounterOperation::ConcurrentCollect => {
                    collects += 1
                }
                _ => other += 1,
            }
        }

        assert!(emits > 1000, "Expected mostly emits");
        assert!(collects > 0);
        assert!(other > 0);
    }

    #[tokio::test]
    async fn test_dst_batch_summary_serializes() {
        let results = run_dst_batch(1000, 3, 100, DeltaCounterDSTConfig::calm).await;
        let summary = summarize_batch(&results);
        assert!(summary.starts_with("Batch: 3/3 passed"), "{}", summary);

        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["seed"], 1000);
        assert!(json.get("history").is_none());
    }
}
