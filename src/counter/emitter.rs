//! Delta Emitter
//!
//! Encodes a unit change for an identifier as a tagged pull task and submits
//! it to the queue. No aggregation happens here, and nothing waits on
//! consumers. Queue failures are returned verbatim; retry policy belongs to
//! the caller.

use super::codec::{IdentifierCodec, Int32Codec, Int64Codec, KeyCodec};
use super::tag::DeltaTag;
use crate::config::CounterConfig;
use crate::error::{CounterError, Result};
use crate::queue::{Task, TaskQueue};
use crate::store::Key;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info};

pub struct DeltaEmitter<Q: TaskQueue> {
    queue: Arc<Q>,
    config: CounterConfig,
}

impl<Q: TaskQueue> DeltaEmitter<Q> {
    /// Fails with `Configuration` when the queue name is empty
    pub fn new(queue: Arc<Q>, config: CounterConfig) -> Result<Self> {
        config.validate()?;
        Ok(DeltaEmitter { queue, config })
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Submit one delta message for an already-encoded identifier
    pub async fn emit(&self, tag: DeltaTag, id: Bytes) -> Result<()> {
        let queue_name = self.config.queue_name()?;
        self.submit(queue_name, tag, id).await
    }

    /// Encode `id` with `codec`, then submit one delta message
    pub async fn emit_with<C: IdentifierCodec>(
        &self,
        codec: &C,
        tag: DeltaTag,
        id: &C::Id,
    ) -> Result<()> {
        let queue_name = self.config.queue_name()?;
        let payload = codec.encode(id)?;
        self.submit(queue_name, tag, payload).await
    }

    async fn submit(&self, queue_name: &str, tag: DeltaTag, payload: Bytes) -> Result<()> {
        debug!(
            id = %String::from_utf8_lossy(&payload),
            queue = queue_name,
            tag = %tag,
            "emit delta"
        );
        self.queue
            .add(queue_name, Task::pull(payload, tag.as_str()))
            .await
            .map(|_| ())
            .map_err(CounterError::from)
    }

    pub async fn increment(&self, id: impl Into<Bytes>) -> Result<()> {
        self.emit(DeltaTag::Incr, id.into()).await
    }

    pub async fn decrement(&self, id: impl Into<Bytes>) -> Result<()> {
        self.emit(DeltaTag::Decr, id.into()).await
    }

    pub async fn increment_with<C: IdentifierCodec>(&self, codec: &C, id: &C::Id) -> Result<()> {
        self.emit_with(codec, DeltaTag::Incr, id).await
    }

    pub async fn decrement_with<C: IdentifierCodec>(&self, codec: &C, id: &C::Id) -> Result<()> {
        self.emit_with(codec, DeltaTag::Decr, id).await
    }

    pub async fn increment_by_str(&self, id: &str) -> Result<()> {
        self.emit(DeltaTag::Incr, Bytes::copy_from_slice(id.as_bytes()))
            .await
    }

    pub async fn decrement_by_str(&self, id: &str) -> Result<()> {
        self.emit(DeltaTag::Decr, Bytes::copy_from_slice(id.as_bytes()))
            .await
    }

    pub async fn increment_by_i32(&self, id: i32) -> Result<()> {
        self.emit_with(&Int32Codec, DeltaTag::Incr, &id).await
    }

    pub async fn decrement_by_i32(&self, id: i32) -> Result<()> {
        self.emit_with(&Int32Codec, DeltaTag::Decr, &id).await
    }

    pub async fn increment_by_i64(&self, id: i64) -> Result<()> {
        self.emit_with(&Int64Codec, DeltaTag::Incr, &id).await
    }

    pub async fn decrement_by_i64(&self, id: i64) -> Result<()> {
        self.emit_with(&Int64Codec, DeltaTag::Decr, &id).await
    }

    /// Fails with `Encoding` if the key is incomplete or malformed
    pub async fn increment_by_key(&self, key: &Key) -> Result<()> {
        self.emit_with(&KeyCodec, DeltaTag::Incr, key).await
    }

    pub async fn decrement_by_key(&self, key: &Key) -> Result<()> {
        self.emit_with(&KeyCodec, DeltaTag::Decr, key).await
    }

    /// Discard every pending delta in the queue. Irreversible; meant for
    /// tests and resets.
    pub async fn purge_async_count(&self) -> Result<()> {
        let queue_name = self.config.queue_name()?;
        info!(queue = queue_name, "purging pending deltas");
        self.queue.purge(queue_name).await?;
        Ok(())
    }
}

impl<Q: TaskQueue> Clone for DeltaEmitter<Q> {
    fn clone(&self) -> Self {
        DeltaEmitter {
            queue: self.queue.clone(),
            config: self.config.clone(),
        }
    }
}
