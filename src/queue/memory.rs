//! In-memory pull queue with lease visibility
//!
//! Tasks are kept per named queue in enqueue order. A lease stamps a
//! visibility deadline on each returned task; once the deadline passes the
//! task is visible again and the next lease bumps its generation.

use super::{LeasedTask, QueueError, QueueFuture, Task, TaskHandle, TaskMethod, TaskQueue};
use crate::clock::{CounterClock, SimulatedClock, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredTask {
    name: String,
    payload: bytes::Bytes,
    tag: String,
    leased_until: Option<Timestamp>,
    generation: u64,
    lease_count: u32,
}

/// Deleted task names remembered per queue for AlreadyDeleted reporting.
/// Older names fall out and report NotFound instead.
const MAX_TOMBSTONES: usize = 10_000;

/// Bounded FIFO set of deleted task names
#[derive(Debug, Default)]
struct Tombstones {
    names: HashSet<String>,
    order: VecDeque<String>,
}

impl Tombstones {
    fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    fn insert(&mut self, name: String) {
        if !self.names.insert(name.clone()) {
            return;
        }
        self.order.push_back(name);
        while self.order.len() > MAX_TOMBSTONES {
            if let Some(oldest) = self.order.pop_front() {
                self.names.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn clear(&mut self) {
        self.names.clear();
        self.order.clear();
    }
}

#[derive(Debug, Default)]
struct NamedQueue {
    /// Enqueue sequence -> task
    tasks: BTreeMap<u64, StoredTask>,
    /// Task name -> enqueue sequence
    index: HashMap<String, u64>,
    /// Names removed by delete_multi since the last purge
    deleted: Tombstones,
}

#[derive(Debug, Default)]
struct QueueState {
    queues: HashMap<String, NamedQueue>,
    next_seq: u64,
}

/// In-memory pull queue.
///
/// Clones share the same underlying queues.
pub struct InMemoryTaskQueue<C: CounterClock = SimulatedClock> {
    clock: C,
    capacity: Option<usize>,
    state: Arc<Mutex<QueueState>>,
}

impl<C: CounterClock> InMemoryTaskQueue<C> {
    pub fn new(clock: C) -> Self {
        InMemoryTaskQueue {
            clock,
            capacity: None,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    /// Bound the number of tasks each named queue accepts
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Total tasks in a queue, leased or not (for testing)
    pub fn len(&self, queue: &str) -> usize {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.tasks.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    /// Tasks that a lease issued now could return (for testing)
    pub fn visible_len(&self, queue: &str) -> usize {
        let now = self.clock.now();
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.tasks.values().filter(|t| is_visible(t, now)).count())
            .unwrap_or(0)
    }

    fn add_sync(&self, queue: &str, task: Task) -> Result<TaskHandle, QueueError> {
        if task.method != TaskMethod::Pull {
            return Err(QueueError::InvalidRequest(format!(
                "queue {} only accepts pull tasks",
                queue
            )));
        }

        let mut state = self.state.lock();
        let seq = state.next_seq;
        let named = state.queues.entry(queue.to_string()).or_default();

        if let Some(capacity) = self.capacity {
            if named.tasks.len() >= capacity {
                return Err(QueueError::CapacityExceeded {
                    queue: queue.to_string(),
                    capacity,
                });
            }
        }

        let name = format!("task-{:016x}", seq);
        named.index.insert(name.clone(), seq);
        named.tasks.insert(
            seq,
            StoredTask {
                name: name.clone(),
                payload: task.payload,
                tag: task.tag,
                leased_until: None,
                generation: 0,
                lease_count: 0,
            },
        );
        state.next_seq += 1;

        Ok(TaskHandle {
            name,
            generation: 0,
        })
    }

    fn lease_sync(
        &self,
        queue: &str,
        max_tasks: usize,
        visibility: Duration,
    ) -> Result<Vec<LeasedTask>, QueueError> {
        if max_tasks == 0 {
            return Err(QueueError::InvalidRequest(
                "lease size must be positive".to_string(),
            ));
        }

        let now = self.clock.now();
        let deadline = now + visibility;
        let mut state = self.state.lock();
        let Some(named) = state.queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let leased = named
            .tasks
            .values_mut()
            .filter(|t| is_visible(t, now))
            .take(max_tasks)
            .map(|t| {
                t.leased_until = Some(deadline);
                t.generation += 1;
                t.lease_count += 1;
                LeasedTask {
                    handle: TaskHandle {
                        name: t.name.clone(),
                        generation: t.generation,
                    },
                    payload: t.payload.clone(),
                    tag: t.tag.clone(),
                    lease_expires: deadline,
                    lease_count: t.lease_count,
                }
            })
            .collect();

        Ok(leased)
    }

    fn delete_multi_sync(&self, queue: &str, handles: &[TaskHandle]) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let named = state.queues.entry(queue.to_string()).or_default();
        let mut first_error = None;

        for handle in handles {
            let outcome = match named.index.get(&handle.name).copied() {
                None if named.deleted.contains(&handle.name) => {
                    Err(QueueError::AlreadyDeleted(handle.name.clone()))
                }
                None => Err(QueueError::NotFound(handle.name.clone())),
                Some(seq) => {
                    let stale = named
                        .tasks
                        .get(&seq)
                        .map(|t| t.generation != handle.generation)
                        .unwrap_or(true);
                    if stale {
                        Err(QueueError::LeaseExpired(handle.name.clone()))
                    } else {
                        named.tasks.remove(&seq);
                        named.index.remove(&handle.name);
                        named.deleted.insert(handle.name.clone());
                        Ok(())
                    }
                }
            };

            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn purge_sync(&self, queue: &str) {
        let mut state = self.state.lock();
        if let Some(named) = state.queues.get_mut(queue) {
            named.tasks.clear();
            named.index.clear();
            named.deleted.clear();
        }
    }
}

impl Default for InMemoryTaskQueue<SimulatedClock> {
    fn default() -> Self {
        Self::new(SimulatedClock::default())
    }
}

impl<C: CounterClock> Clone for InMemoryTaskQueue<C> {
    fn clone(&self) -> Self {
        InMemoryTaskQueue {
            clock: self.clock.clone(),
            capacity: self.capacity,
            state: Arc::clone(&self.state),
        }
    }
}

fn is_visible(task: &StoredTask, now: Timestamp) -> bool {
    match task.leased_until {
        None => true,
        Some(deadline) => now >= deadline,
    }
}

impl<C: CounterClock> TaskQueue for InMemoryTaskQueue<C> {
    fn add<'a>(&'a self, queue: &'a str, task: Task) -> QueueFuture<'a, TaskHandle> {
        Box::pin(async move { self.add_sync(queue, task) })
    }

    fn lease<'a>(
        &'a self,
        queue: &'a str,
        max_tasks: usize,
        visibility: Duration,
    ) -> QueueFuture<'a, Vec<LeasedTask>> {
        Box::pin(async move { self.lease_sync(queue, max_tasks, visibility) })
    }

    fn delete_multi<'a>(
        &'a self,
        queue: &'a str,
        handles: &'a [TaskHandle],
    ) -> QueueFuture<'a, ()> {
        Box::pin(async move { self.delete_multi_sync(queue, handles) })
    }

    fn purge<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.purge_sync(queue);
            Ok(())
        })
    }
}
