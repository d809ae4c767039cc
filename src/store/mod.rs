//! Key-value store collaborator
//!
//! - `Key` / `KeyEncoder`: structured identifiers and their canonical text form
//! - `CounterStore`: where applied aggregates end up

pub mod counter_store;
pub mod key;

pub use counter_store::{CounterStore, DrainReport, InMemoryCounterStore, StoreFuture};
pub use key::{Key, KeyEncoder, KeyId, MAX_ENCODED_LEN, MAX_KEY_DEPTH};
