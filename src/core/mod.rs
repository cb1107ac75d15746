//! Core admission control: tags, tokens, the pool and its background loops.

pub mod error;
pub mod tag;
pub mod registry;
pub mod elastic;
pub mod substrate;
pub mod handlers;
pub mod gate;
pub mod ingest;
pub mod results;
pub mod stats;
pub mod pool;

mod lifecycle;
mod monitor;
mod pending;

pub use error::{AppResult, ConfigError, PoolError, TaskFailure};
pub use tag::Tag;
pub use registry::{CapacityRegistry, TokenPermit, TokenPool};
pub use elastic::Adjustment;
pub use substrate::{CompletionHandle, ExecutionSubstrate, Job, ThreadSubstrate};
pub use handlers::{ErrorHandler, ErrorPolicy, ResultHandler, TaskOptions};
pub use gate::Admission;
pub use pending::TaskId;
pub use ingest::{IngestHandle, StreamId};
pub use results::ResultIter;
pub use stats::PoolStats;
pub use pool::TagPool;
