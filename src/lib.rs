pub mod buggify;
pub mod clock;
pub mod config;
pub mod counter;
pub mod dst;
pub mod error;
pub mod observability;
pub mod queue;
pub mod simulator;
pub mod store;

pub use clock::{CounterClock, ProductionClock, SimulatedClock, Timestamp};
pub use config::CounterConfig;
pub use counter::{
    AggregateMap, DeltaAggregator, DeltaCounter, DeltaEmitter, DeltaTag, IdentifierCodec,
    LeaseBatch,
};
pub use error::{CounterError, Result};
pub use queue::{InMemoryTaskQueue, QueueError, Task, TaskHandle, TaskQueue};
pub use store::{CounterStore, InMemoryCounterStore, Key, KeyEncoder};
