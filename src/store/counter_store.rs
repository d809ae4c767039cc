//! Counter Store
//!
//! The running totals belong to the embedding system. The aggregator only
//! hands it one `AggregateMap` per lease; applying it durably is the store's
//! job and must happen before the batch is committed.

use crate::counter::AggregateMap;
use crate::error::{CounterError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by store operations
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable running totals keyed by identifier
pub trait CounterStore<Id>: Send + Sync + 'static
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Add every delta in `deltas` to its running total, atomically
    fn apply<'a>(&'a self, deltas: &'a AggregateMap<Id>) -> StoreFuture<'a, ()>;

    /// Current total; zero for an identifier never seen
    fn get<'a>(&'a self, id: &'a Id) -> StoreFuture<'a, i64>;
}

/// Totals held in process memory
pub struct InMemoryCounterStore<Id> {
    totals: Arc<RwLock<HashMap<Id, i64>>>,
    /// Reject applies once this many have succeeded
    fail_after: Option<usize>,
    applied: Arc<RwLock<usize>>,
}

impl<Id> InMemoryCounterStore<Id>
where
    Id: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        InMemoryCounterStore {
            totals: Arc::new(RwLock::new(HashMap::new())),
            fail_after: None,
            applied: Arc::new(RwLock::new(0)),
        }
    }

    /// Fail every apply after the first `n` succeed
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Copy of every total
    pub fn snapshot(&self) -> HashMap<Id, i64> {
        self.totals.read().clone()
    }

    pub fn total(&self, id: &Id) -> i64 {
        self.totals.read().get(id).copied().unwrap_or(0)
    }

    /// Number of successful applies
    pub fn apply_count(&self) -> usize {
        *self.applied.read()
    }

    /// Subtract a previously applied aggregate
    pub fn revert(&self, deltas: &AggregateMap<Id>) {
        let mut totals = self.totals.write();
        for (id, delta) in deltas {
            *totals.entry(id.clone()).or_insert(0) -= delta;
        }
    }
}

impl<Id> Default for InMemoryCounterStore<Id>
where
    Id: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Id> Clone for InMemoryCounterStore<Id> {
    fn clone(&self) -> Self {
        InMemoryCounterStore {
            totals: self.totals.clone(),
            fail_after: self.fail_after,
            applied: self.applied.clone(),
        }
    }
}

impl<Id> CounterStore<Id> for InMemoryCounterStore<Id>
where
    Id: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn apply<'a>(&'a self, deltas: &'a AggregateMap<Id>) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut applied = self.applied.write();
            if let Some(limit) = self.fail_after {
                if *applied >= limit {
                    return Err(CounterError::Store(format!(
                        "refusing apply after {} successful applies",
                        limit
                    )));
                }
            }

            let mut totals = self.totals.write();
            for (id, delta) in deltas {
                *totals.entry(id.clone()).or_insert(0) += delta;
            }
            *applied += 1;
            Ok(())
        })
    }

    fn get<'a>(&'a self, id: &'a Id) -> StoreFuture<'a, i64> {
        Box::pin(async move { Ok(self.total(id)) })
    }
}

/// Outcome of draining a queue into a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport<Id: Eq + Hash> {
    /// Leases that returned a non-empty aggregate
    pub rounds: usize,
    /// Messages deleted across all rounds
    pub messages: usize,
    /// Net delta applied per identifier
    pub totals: HashMap<Id, i64>,
}

impl<Id: Eq + Hash> Default for DrainReport<Id> {
    fn default() -> Self {
        DrainReport {
            rounds: 0,
            messages: 0,
            totals: HashMap::new(),
        }
    }
}
