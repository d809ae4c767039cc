//! Simulation support: seeded randomness shared by fault injection and DST

mod rng;

pub use rng::{DeterministicRng, Rng};
