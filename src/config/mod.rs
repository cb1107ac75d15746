//! Configuration models for tag layouts and poll intervals.

pub mod pool;

pub use pool::{PollIntervals, PoolConfig, ENV_ITERATION, ENV_LIMIT, ENV_TAGS};
