//! Task Queue Abstraction
//!
//! The counter never touches storage directly. It needs four primitives
//! from a pull queue:
//!
//! - durable enqueue of a tagged payload
//! - batched lease with a max count and a visibility timeout
//! - batched delete of previously leased tasks, by identity
//! - full purge
//!
//! Implementations:
//! - `InMemoryTaskQueue`: For unit tests, DST, and single-process embedding
//! - `SimulatedTaskQueue`: Fault-injecting wrapper for DST

pub mod memory;
pub mod simulated;

pub use memory::InMemoryTaskQueue;
pub use simulated::{SimulatedQueueConfig, SimulatedQueueStats, SimulatedTaskQueue};

use crate::clock::Timestamp;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by queue operations
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// How a task is delivered to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskMethod {
    /// Must be explicitly leased by a consumer
    Pull,
    /// Delivered by the queue to a handler
    Push,
}

/// A task to enqueue. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub payload: Bytes,
    pub tag: String,
    pub method: TaskMethod,
}

impl Task {
    /// Create a pull task
    pub fn pull(payload: impl Into<Bytes>, tag: impl Into<String>) -> Self {
        Task {
            payload: payload.into(),
            tag: tag.into(),
            method: TaskMethod::Pull,
        }
    }
}

/// Identity of a task within one lease.
///
/// The generation changes every time the task is leased, so a handle from an
/// expired lease can be told apart from the current holder's.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    pub name: String,
    pub generation: u64,
}

/// A task returned by `lease`, exclusively visible until `lease_expires`
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub handle: TaskHandle,
    pub payload: Bytes,
    pub tag: String,
    pub lease_expires: Timestamp,
    /// Number of times this task has been leased, including this lease
    pub lease_count: u32,
}

/// Error type for queue operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Task does not exist in the queue
    NotFound(String),
    /// Task was deleted earlier
    AlreadyDeleted(String),
    /// Task was re-leased by another consumer after this lease expired
    LeaseExpired(String),
    /// Queue refused the enqueue
    CapacityExceeded { queue: String, capacity: usize },
    /// Backend unreachable, timed out, or failed transiently
    Unavailable(String),
    /// Malformed request (e.g. zero lease size, push task on a pull queue)
    InvalidRequest(String),
}

impl QueueError {
    /// Whether the same request may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QueueError::Unavailable(_) | QueueError::CapacityExceeded { .. }
        )
    }
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::NotFound(name) => write!(f, "Task not found: {}", name),
            QueueError::AlreadyDeleted(name) => write!(f, "Task already deleted: {}", name),
            QueueError::LeaseExpired(name) => write!(f, "Lease expired for task: {}", name),
            QueueError::CapacityExceeded { queue, capacity } => {
                write!(f, "Queue {} is full (capacity {})", queue, capacity)
            }
            QueueError::Unavailable(msg) => write!(f, "Queue unavailable: {}", msg),
            QueueError::InvalidRequest(msg) => write!(f, "Invalid queue request: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

/// Pull-queue abstraction trait
///
/// Follows the same boxed-future shape as the other storage seams so
/// implementations can be swapped under DST.
pub trait TaskQueue: Send + Sync + 'static {
    /// Durably enqueue a task
    fn add<'a>(&'a self, queue: &'a str, task: Task) -> QueueFuture<'a, TaskHandle>;

    /// Lease up to `max_tasks` visible tasks, hiding them for `visibility`
    fn lease<'a>(
        &'a self,
        queue: &'a str,
        max_tasks: usize,
        visibility: Duration,
    ) -> QueueFuture<'a, Vec<LeasedTask>>;

    /// Delete previously leased tasks by identity.
    ///
    /// Every handle is attempted; the first failure is returned.
    fn delete_multi<'a>(&'a self, queue: &'a str, handles: &'a [TaskHandle])
        -> QueueFuture<'a, ()>;

    /// Discard every task in the queue
    fn purge<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, ()>;
}
