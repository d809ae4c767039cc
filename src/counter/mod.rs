//! Eventually-consistent distributed counter
//!
//! Writers never touch the running total. Each increment or decrement is one
//! tagged message on a pull queue. A collector periodically leases a batch,
//! folds it into one net delta per identifier, applies that to the store,
//! and only then commits (deletes) the batch.
//!
//! ```text
//! emitters ──"++"/"--"──> queue ──lease──> aggregator ──apply──> store
//!                           ^                  │
//!                           └─────commit───────┘
//! ```
//!
//! Every message is applied at least once. A collector that dies between
//! apply and commit causes that batch to be applied again after its lease
//! expires.

pub mod aggregator;
pub mod codec;
pub mod emitter;
pub mod tag;

pub use aggregator::{aggregate_tasks, rekey, AggregateMap, Aggregation, DeltaAggregator, LeaseBatch};
pub use codec::{IdentifierCodec, Int32Codec, Int64Codec, KeyCodec, RawCodec, StringCodec};
pub use emitter::DeltaEmitter;
pub use tag::DeltaTag;

use crate::config::CounterConfig;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::store::{CounterStore, DrainReport, Key};
use bytes::Bytes;
use std::sync::Arc;

/// Emitter and aggregator bound to one queue and one configuration
pub struct DeltaCounter<Q: TaskQueue> {
    emitter: DeltaEmitter<Q>,
    aggregator: DeltaAggregator<Q>,
}

impl<Q: TaskQueue> DeltaCounter<Q> {
    pub fn new(queue: Arc<Q>, config: CounterConfig) -> Result<Self> {
        Ok(DeltaCounter {
            emitter: DeltaEmitter::new(queue.clone(), config.clone())?,
            aggregator: DeltaAggregator::new(queue, config)?,
        })
    }

    pub fn emitter(&self) -> &DeltaEmitter<Q> {
        &self.emitter
    }

    pub fn aggregator(&self) -> &DeltaAggregator<Q> {
        &self.aggregator
    }

    pub fn config(&self) -> &CounterConfig {
        self.emitter.config()
    }

    pub async fn increment(&self, id: impl Into<Bytes>) -> Result<()> {
        self.emitter.increment(id).await
    }

    pub async fn decrement(&self, id: impl Into<Bytes>) -> Result<()> {
        self.emitter.decrement(id).await
    }

    pub async fn increment_by_str(&self, id: &str) -> Result<()> {
        self.emitter.increment_by_str(id).await
    }

    pub async fn decrement_by_str(&self, id: &str) -> Result<()> {
        self.emitter.decrement_by_str(id).await
    }

    pub async fn increment_by_i32(&self, id: i32) -> Result<()> {
        self.emitter.increment_by_i32(id).await
    }

    pub async fn decrement_by_i32(&self, id: i32) -> Result<()> {
        self.emitter.decrement_by_i32(id).await
    }

    pub async fn increment_by_i64(&self, id: i64) -> Result<()> {
        self.emitter.increment_by_i64(id).await
    }

    pub async fn decrement_by_i64(&self, id: i64) -> Result<()> {
        self.emitter.decrement_by_i64(id).await
    }

    pub async fn increment_by_key(&self, key: &Key) -> Result<()> {
        self.emitter.increment_by_key(key).await
    }

    pub async fn decrement_by_key(&self, key: &Key) -> Result<()> {
        self.emitter.decrement_by_key(key).await
    }

    pub async fn lease<C: IdentifierCodec>(
        &self,
        codec: &C,
    ) -> Result<(LeaseBatch, AggregateMap<C::Id>)> {
        self.aggregator.lease(codec).await
    }

    pub async fn collect_delta_raw(&self) -> Result<(LeaseBatch, AggregateMap<Bytes>)> {
        self.aggregator.collect_delta_raw().await
    }

    pub async fn collect_delta_by_string(&self) -> Result<(LeaseBatch, AggregateMap<String>)> {
        self.aggregator.collect_delta_by_string().await
    }

    pub async fn collect_delta_by_int(&self) -> Result<(LeaseBatch, AggregateMap<i32>)> {
        self.aggregator.collect_delta_by_int().await
    }

    pub async fn collect_delta_by_int64(&self) -> Result<(LeaseBatch, AggregateMap<i64>)> {
        self.aggregator.collect_delta_by_int64().await
    }

    pub async fn collect_delta_by_key(&self) -> Result<(LeaseBatch, AggregateMap<Key>)> {
        self.aggregator.collect_delta_by_key().await
    }

    pub async fn commit(&self, batch: &LeaseBatch) -> Result<()> {
        self.aggregator.commit(batch).await
    }

    pub async fn drain_into<C, S>(&self, codec: &C, store: &S) -> Result<DrainReport<C::Id>>
    where
        C: IdentifierCodec,
        C::Id: Sync + 'static,
        S: CounterStore<C::Id>,
    {
        self.aggregator.drain_into(codec, store).await
    }

    pub async fn purge_async_count(&self) -> Result<()> {
        self.emitter.purge_async_count().await
    }
}

impl<Q: TaskQueue> Clone for DeltaCounter<Q> {
    fn clone(&self) -> Self {
        DeltaCounter {
            emitter: self.emitter.clone(),
            aggregator: self.aggregator.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryTaskQueue;

    #[tokio::test]
    async fn test_facade_shares_queue() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        let counter = DeltaCounter::new(queue.clone(), CounterConfig::new("views")).unwrap();

        counter.increment_by_i32(3).await.unwrap();
        counter.increment_by_i32(3).await.unwrap();
        counter.decrement_by_i32(4).await.unwrap();

        let (batch, map) = counter.collect_delta_by_int().await.unwrap();
        assert_eq!(map[&3], 2);
        assert_eq!(map[&4], -1);

        counter.commit(&batch).await.unwrap();
        assert!(queue.is_empty("views"));
    }

    #[test]
    fn test_facade_rejects_empty_queue_name() {
        let queue = Arc::new(InMemoryTaskQueue::default());
        assert!(DeltaCounter::new(queue, CounterConfig::new(""))
            .err()
            .unwrap()
            .is_configuration());
    }
}
