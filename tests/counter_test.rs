//! Delta Counter Integration Tests
//!
//! End-to-end emit / lease / apply / commit flows over the in-memory queue,
//! driven on a simulated clock so lease expiry is exact.

use bytes::Bytes;
use delta_counter::counter::{Int64Codec, StringCodec};
use delta_counter::queue::{LeasedTask, QueueFuture};
use delta_counter::store::{MAX_ENCODED_LEN, MAX_KEY_DEPTH};
use delta_counter::{
    CounterConfig, CounterError, CounterStore, DeltaCounter, InMemoryCounterStore,
    InMemoryTaskQueue, Key, QueueError, Task, TaskHandle, TaskQueue,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const QUEUE: &str = "page-views";

fn counter() -> (Arc<InMemoryTaskQueue>, DeltaCounter<InMemoryTaskQueue>) {
    let queue = Arc::new(InMemoryTaskQueue::default());
    let counter = DeltaCounter::new(queue.clone(), CounterConfig::new(QUEUE)).unwrap();
    (queue, counter)
}

/// Queue wrapper that counts every call reaching it
struct CountingQueue {
    inner: InMemoryTaskQueue,
    calls: AtomicUsize,
}

impl CountingQueue {
    fn new() -> Self {
        CountingQueue {
            inner: InMemoryTaskQueue::default(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TaskQueue for CountingQueue {
    fn add<'a>(&'a self, queue: &'a str, task: Task) -> QueueFuture<'a, TaskHandle> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.add(queue, task)
    }

    fn lease<'a>(
        &'a self,
        queue: &'a str,
        max_tasks: usize,
        visibility: Duration,
    ) -> QueueFuture<'a, Vec<LeasedTask>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.lease(queue, max_tasks, visibility)
    }

    fn delete_multi<'a>(
        &'a self,
        queue: &'a str,
        handles: &'a [TaskHandle],
    ) -> QueueFuture<'a, ()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_multi(queue, handles)
    }

    fn purge<'a>(&'a self, queue: &'a str) -> QueueFuture<'a, ()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.purge(queue)
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_increments_then_commit_then_empty() {
    let (_queue, counter) = counter();
    counter.increment_by_str("a").await.unwrap();
    counter.increment_by_str("a").await.unwrap();
    counter.increment_by_str("b").await.unwrap();

    let (batch, map) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map["a"], 2);
    assert_eq!(map["b"], 1);
    counter.commit(&batch).await.unwrap();

    let (_, map) = counter.collect_delta_by_string().await.unwrap();
    assert!(map.is_empty());
}

#[tokio::test]
async fn test_decrements_aggregate_negative() {
    let (_queue, counter) = counter();
    counter.decrement_by_str("a").await.unwrap();
    counter.decrement_by_str("a").await.unwrap();
    counter.decrement_by_str("b").await.unwrap();

    let (_, map) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(map["a"], -2);
    assert_eq!(map["b"], -1);
}

#[tokio::test]
async fn test_empty_queue_name_never_reaches_queue() {
    let queue = Arc::new(CountingQueue::new());
    let err = DeltaCounter::new(queue.clone(), CounterConfig::new("")).err().unwrap();

    assert_eq!(err, CounterError::empty_queue_name());
    assert_eq!(queue.calls(), 0);
}

// =============================================================================
// Drain Properties
// =============================================================================

#[tokio::test]
async fn test_full_drain_yields_net_delta() {
    let queue = Arc::new(InMemoryTaskQueue::default());
    let config = CounterConfig::new(QUEUE).with_lease_batch_size(7);
    let counter = DeltaCounter::new(queue, config).unwrap();

    let (n, m) = (53, 21);
    for _ in 0..n {
        counter.increment_by_i64(900).await.unwrap();
    }
    for _ in 0..m {
        counter.decrement_by_i64(900).await.unwrap();
    }

    let mut net = 0;
    loop {
        let (batch, map) = counter.collect_delta_by_int64().await.unwrap();
        if map.is_empty() {
            break;
        }
        assert!(map.keys().all(|id| *id == 900));
        net += map.values().sum::<i64>();
        counter.commit(&batch).await.unwrap();
    }
    assert_eq!(net, n - m);

    let (_, map) = counter.collect_delta_by_int64().await.unwrap();
    assert!(map.is_empty());
}

#[tokio::test]
async fn test_drain_into_store() {
    let (queue, counter) = counter();
    let store = InMemoryCounterStore::<String>::new();

    for id in ["x", "y", "x", "z", "x"] {
        counter.increment_by_str(id).await.unwrap();
    }
    counter.decrement_by_str("z").await.unwrap();

    let report = counter.drain_into(&StringCodec, &store).await.unwrap();
    assert_eq!(report.messages, 6);
    assert_eq!(store.get(&"x".to_string()).await.unwrap(), 3);
    assert_eq!(store.get(&"y".to_string()).await.unwrap(), 1);
    assert_eq!(store.get(&"z".to_string()).await.unwrap(), 0);
    assert!(queue.is_empty(QUEUE));

    let again = counter.drain_into(&StringCodec, &store).await.unwrap();
    assert_eq!(again.rounds, 0);
}

#[tokio::test]
async fn test_purge_then_collect_is_empty() {
    let (queue, counter) = counter();
    for i in 0..250 {
        counter.increment_by_i32(i % 13).await.unwrap();
    }
    // Leased-but-uncommitted messages go too
    let (_leased, _) = counter.collect_delta_by_int().await.unwrap();
    for i in 0..10 {
        counter.decrement_by_i32(i).await.unwrap();
    }

    counter.purge_async_count().await.unwrap();
    let (batch, map) = counter.collect_delta_by_int().await.unwrap();
    assert!(map.is_empty());
    assert!(batch.is_empty());

    queue.clock().advance(counter.config().visibility_timeout);
    let (_, map) = counter.collect_delta_by_int().await.unwrap();
    assert!(map.is_empty());
}

// =============================================================================
// Lease Lifecycle
// =============================================================================

#[tokio::test]
async fn test_uncommitted_lease_comes_back() {
    let (queue, counter) = counter();
    counter.increment_by_str("a").await.unwrap();
    counter.increment_by_str("a").await.unwrap();
    counter.decrement_by_str("b").await.unwrap();

    let (abandoned, first) = counter.collect_delta_by_string().await.unwrap();
    drop(abandoned);

    let (_, hidden) = counter.collect_delta_by_string().await.unwrap();
    assert!(hidden.is_empty(), "leased messages must stay hidden");

    queue
        .clock()
        .advance(counter.config().visibility_timeout - Duration::from_millis(1));
    let (_, still_hidden) = counter.collect_delta_by_string().await.unwrap();
    assert!(still_hidden.is_empty());

    queue.clock().advance_ms(1);
    let (batch, second) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(first, second);
    counter.commit(&batch).await.unwrap();
    assert!(queue.is_empty(QUEUE));
}

#[tokio::test]
async fn test_stale_commit_rejected_after_release() {
    let (queue, counter) = counter();
    counter.increment_by_str("a").await.unwrap();

    let (slow, _) = counter.collect_delta_by_string().await.unwrap();
    queue.clock().advance(counter.config().visibility_timeout);
    let (fast, map) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(map["a"], 1);

    counter.commit(&fast).await.unwrap();
    let err = counter.commit(&slow).await.unwrap_err();
    assert!(matches!(
        err,
        CounterError::QueueUnavailable(QueueError::AlreadyDeleted(_))
    ));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_stale_commit_before_fresh_commit() {
    let (queue, counter) = counter();
    counter.increment_by_str("a").await.unwrap();

    let (slow, _) = counter.collect_delta_by_string().await.unwrap();
    queue.clock().advance(counter.config().visibility_timeout);
    let (fast, _) = counter.collect_delta_by_string().await.unwrap();

    let err = counter.commit(&slow).await.unwrap_err();
    assert!(matches!(
        err,
        CounterError::QueueUnavailable(QueueError::LeaseExpired(_))
    ));
    counter.commit(&fast).await.unwrap();
    assert!(queue.is_empty(QUEUE));
}

#[tokio::test]
async fn test_concurrent_collectors_disjoint() {
    let queue = Arc::new(InMemoryTaskQueue::default());
    let config = CounterConfig::new(QUEUE).with_lease_batch_size(40);
    let counter = DeltaCounter::new(queue.clone(), config).unwrap();

    for i in 0..200 {
        counter.increment_by_i64(i % 5).await.unwrap();
    }

    let collectors: Vec<_> = (0..4).map(|_| counter.clone()).collect();
    let results = futures::future::join_all(
        collectors
            .iter()
            .map(|c| c.lease(&Int64Codec)),
    )
    .await;

    let mut seen = HashSet::new();
    let mut total = 0;
    for result in results {
        let (batch, map) = result.unwrap();
        for handle in batch.handles() {
            assert!(seen.insert(handle.name.clone()), "message leased twice");
        }
        total += map.values().sum::<i64>();
        counter.commit(&batch).await.unwrap();
    }
    assert_eq!(total, 160);
    assert_eq!(queue.len(QUEUE), 40);
}

// =============================================================================
// Typed Identifiers
// =============================================================================

#[tokio::test]
async fn test_typed_collect_rekeys() {
    let (queue, counter) = counter();
    counter.increment_by_i32(7).await.unwrap();
    counter.increment_by_i32(-7).await.unwrap();
    // Distinct payloads, same integer
    queue.add(QUEUE, Task::pull("07", "++")).await.unwrap();

    let (_, map) = counter.collect_delta_by_int().await.unwrap();
    assert_eq!(map.len(), 2);
    assert_eq!(map[&7], 2);
    assert_eq!(map[&-7], 1);
}

#[tokio::test]
async fn test_key_identifiers() {
    let (_queue, counter) = counter();
    let post = Key::numbered("Post", 42).with_parent(Key::named("User", "ada"));
    let other = Key::numbered("Post", 43).with_parent(Key::named("User", "ada"));

    counter.increment_by_key(&post).await.unwrap();
    counter.increment_by_key(&post).await.unwrap();
    counter.decrement_by_key(&other).await.unwrap();

    let (batch, map) = counter.collect_delta_by_key().await.unwrap();
    assert_eq!(map[&post], 2);
    assert_eq!(map[&other], -1);
    counter.commit(&batch).await.unwrap();
}

#[tokio::test]
async fn test_key_depth_bounded_on_emit_and_collect() {
    let (queue, counter) = counter();
    let too_deep = (2..=MAX_KEY_DEPTH as i64 + 1).fold(Key::numbered("Level", 1), |parent, i| {
        Key::numbered("Level", i).with_parent(parent)
    });

    let err = counter.increment_by_key(&too_deep).await.unwrap_err();
    assert!(matches!(err, CounterError::Encoding(_)));
    assert!(queue.is_empty(QUEUE));

    // A hostile payload is refused before it is parsed
    queue
        .add(QUEUE, Task::pull("A".repeat(MAX_ENCODED_LEN + 1), "++"))
        .await
        .unwrap();
    let err = counter.collect_delta_by_key().await.unwrap_err();
    assert!(err.is_decoding());
    assert_eq!(queue.visible_len(QUEUE), 0);
}

#[tokio::test]
async fn test_decoding_failure_leaves_lease() {
    let (queue, counter) = counter();
    counter.increment_by_str("12").await.unwrap();
    counter.increment_by_str("twelve").await.unwrap();

    let err = counter.collect_delta_by_int().await.unwrap_err();
    assert!(err.is_decoding());
    assert_eq!(queue.visible_len(QUEUE), 0);

    queue.clock().advance(counter.config().visibility_timeout);
    let (batch, map) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(map.len(), 2);
    counter.commit(&batch).await.unwrap();
}

#[tokio::test]
async fn test_raw_identifiers() {
    let (_queue, counter) = counter();
    counter.increment(Bytes::from_static(b"\x00\xff")).await.unwrap();
    counter.increment(vec![0u8, 255]).await.unwrap();

    let (_, map) = counter.collect_delta_raw().await.unwrap();
    assert_eq!(map[&Bytes::from_static(b"\x00\xff")], 2);
    assert!(counter.collect_delta_by_string().await.unwrap().1.is_empty());
}

#[tokio::test]
async fn test_anomalous_tags_quarantined() {
    let (queue, counter) = counter();
    counter.increment_by_str("a").await.unwrap();
    queue.add(QUEUE, Task::pull("a", "INCR")).await.unwrap();

    let (batch, map) = counter.collect_delta_by_string().await.unwrap();
    assert_eq!(map["a"], 1);
    assert_eq!(batch.anomalous().len(), 1);
    counter.commit(&batch).await.unwrap();

    for _ in 0..3 {
        queue.clock().advance(counter.config().visibility_timeout);
        let (batch, map) = counter.collect_delta_by_string().await.unwrap();
        assert!(map.is_empty());
        assert_eq!(batch.anomalous().len(), 1);
    }
    assert_eq!(queue.len(QUEUE), 1);
}
