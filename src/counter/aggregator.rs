//! Delta Aggregator
//!
//! Two-phase consumption of delta messages:
//!
//! ```text
//! lease(codec)  ->  (LeaseBatch, AggregateMap)   queue hides the batch
//!   caller durably applies AggregateMap
//! commit(&batch)                                 queue deletes the batch
//! ```
//!
//! A batch that is never committed reappears after the visibility timeout,
//! so a crash between lease and commit re-delivers rather than loses deltas.

use super::codec::{IdentifierCodec, Int32Codec, Int64Codec, KeyCodec, RawCodec, StringCodec};
use super::tag::DeltaTag;
use crate::clock::Timestamp;
use crate::config::CounterConfig;
use crate::error::Result;
use crate::queue::{LeasedTask, TaskHandle, TaskQueue};
use crate::store::{CounterStore, DrainReport, Key};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Net signed delta per identifier within one leased batch.
///
/// Identifiers with no message in the batch are absent.
pub type AggregateMap<Id> = HashMap<Id, i64>;

/// Tasks held under one lease, and the only handle for deleting them
#[derive(Debug, Clone)]
#[must_use = "an uncommitted batch is re-delivered after its lease expires"]
pub struct LeaseBatch {
    queue_name: String,
    /// Tasks whose deltas are in the aggregate; deleted on commit
    consumed: Vec<TaskHandle>,
    /// Tasks with unknown tags; never deleted by commit
    anomalous: Vec<TaskHandle>,
    lease_expires: Option<Timestamp>,
}

impl LeaseBatch {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Handles that `commit` deletes
    pub fn handles(&self) -> &[TaskHandle] {
        &self.consumed
    }

    /// Leased tasks skipped because of an unknown tag
    pub fn anomalous(&self) -> &[TaskHandle] {
        &self.anomalous
    }

    /// Number of delta messages folded into the aggregate
    pub fn len(&self) -> usize {
        self.consumed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumed.is_empty()
    }

    /// When the lease lapses; `None` for an empty lease
    pub fn lease_expires(&self) -> Option<Timestamp> {
        self.lease_expires
    }
}

/// One pass over a leased batch, keyed by raw payload
#[derive(Debug, Default)]
pub struct Aggregation {
    pub deltas: AggregateMap<Bytes>,
    pub consumed: Vec<TaskHandle>,
    pub anomalous: Vec<TaskHandle>,
}

/// Sum signed unit deltas per payload. Unknown tags are logged and skipped.
pub fn aggregate_tasks(tasks: &[LeasedTask]) -> Aggregation {
    let mut aggregation = Aggregation {
        deltas: HashMap::with_capacity(tasks.len()),
        ..Aggregation::default()
    };

    for task in tasks {
        match DeltaTag::parse(&task.tag) {
            Some(tag) => {
                *aggregation.deltas.entry(task.payload.clone()).or_insert(0) += tag.delta();
                aggregation.consumed.push(task.handle.clone());
            }
            None => {
                warn!(
                    tag = %task.tag,
                    id = %String::from_utf8_lossy(&task.payload),
                    task = %task.handle.name,
                    "unknown tag, leaving task leased"
                );
                aggregation.anomalous.push(task.handle.clone());
            }
        }
    }

    aggregation
}

/// Re-key a raw aggregate through `codec`. All-or-nothing.
///
/// Distinct payloads that decode to the same identifier are summed.
pub fn rekey<C: IdentifierCodec>(
    codec: &C,
    raw: AggregateMap<Bytes>,
) -> Result<AggregateMap<C::Id>> {
    let mut map = HashMap::with_capacity(raw.len());
    for (payload, delta) in raw {
        let id = codec.decode(&payload)?;
        *map.entry(id).or_insert(0) += delta;
    }
    Ok(map)
}

pub struct DeltaAggregator<Q: TaskQueue> {
    queue: Arc<Q>,
    config: CounterConfig,
}

impl<Q: TaskQueue> DeltaAggregator<Q> {
    /// Fails with `Configuration` when the queue name is empty
    pub fn new(queue: Arc<Q>, config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(DeltaAggregator { queue, config })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Lease up to `lease_batch_size` messages and aggregate them under `codec`.
    ///
    /// On a decoding error nothing is returned and the lease is left to
    /// expire, so the messages become collectible again.
    pub async fn lease<C: IdentifierCodec>(
        &self,
        codec: &C,
    ) -> Result<(LeaseBatch, AggregateMap<C::Id>)> {
        let queue_name = self.config.queue_name()?;
        let tasks = self
            .queue
            .lease(
                queue_name,
                self.config.lease_batch_size,
                self.config.visibility_timeout,
            )
            .await?;

        let lease_expires = tasks.iter().map(|t| t.lease_expires).max();
        let Aggregation {
            deltas,
            consumed,
            anomalous,
        } = aggregate_tasks(&tasks);

        let map = rekey(codec, deltas)?;
        debug!(
            queue = queue_name,
            leased = tasks.len(),
            identifiers = map.len(),
            anomalous = anomalous.len(),
            "collected deltas"
        );

        let batch = LeaseBatch {
            queue_name: queue_name.to_string(),
            consumed,
            anomalous,
            lease_expires,
        };
        Ok((batch, map))
    }

    /// Delete exactly the messages aggregated into `batch`.
    ///
    /// Call only after the aggregate is durably applied. Committing twice or
    /// after another collector re-leased the messages fails in the queue.
    pub async fn commit(&self, batch: &LeaseBatch) -> Result<()> {
        self.config.queue_name()?;
        if batch.consumed.is_empty() {
            return Ok(());
        }

        self.queue
            .delete_multi(&batch.queue_name, &batch.consumed)
            .await?;
        info!(
            queue = %batch.queue_name,
            deleted = batch.consumed.len(),
            "committed delta batch"
        );
        Ok(())
    }

    /// Lease, apply and commit until a lease returns no tasks at all.
    ///
    /// A lease holding only unknown tags yields an empty map but is not the
    /// end of the queue; those tasks stay leased and draining continues.
    /// Stops at the first failure. A failed commit after a successful apply
    /// leaves the batch leased, so it is applied again once the lease lapses.
    pub async fn drain_into<C, S>(&self, codec: &C, store: &S) -> Result<DrainReport<C::Id>>
    where
        C: IdentifierCodec,
        C::Id: Sync + 'static,
        S: CounterStore<C::Id>,
    {
        let mut report = DrainReport::default();
        loop {
            let (batch, map) = self.lease(codec).await?;
            if batch.is_empty() && batch.anomalous().is_empty() {
                break;
            }
            if map.is_empty() {
                continue;
            }

            store.apply(&map).await?;
            self.commit(&batch).await?;

            report.rounds += 1;
            report.messages += batch.len();
            for (id, delta) in map {
                *report.totals.entry(id).or_insert(0) += delta;
            }
        }
        debug!(
            rounds = report.rounds,
            messages = report.messages,
            "drained delta queue"
        );
        Ok(report)
    }

    pub async fn collect_delta_raw(&self) -> Result<(LeaseBatch, AggregateMap<Bytes>)> {
        self.lease(&RawCodec).await
    }

    pub async fn collect_delta_by_string(&self) -> Result<(LeaseBatch, AggregateMap<String>)> {
        self.lease(&StringCodec).await
    }

    pub async fn collect_delta_by_int(&self) -> Result<(LeaseBatch, AggregateMap<i32>)> {
        self.lease(&Int32Codec).await
    }

    pub async fn collect_delta_by_int64(&self) -> Result<(LeaseBatch, AggregateMap<i64>)> {
        self.lease(&Int64Codec).await
    }

    pub async fn collect_delta_by_key(&self) -> Result<(LeaseBatch, AggregateMap<Key>)> {
        self.lease(&KeyCodec).await
    }
}

impl<Q: TaskQueue> Clone for DeltaAggregator<Q> {
    fn clone(&self) -> Self {
        DeltaAggregator {
            queue: self.queue.clone(),
            config: self.config.clone(),
        }
    }
}
