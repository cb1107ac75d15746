//! # Tagged Pool
//!
//! Tag-partitioned admission control over a pool of workers.
//!
//! Every task is submitted under a *tag*, a named bucket with its own
//! concurrency ceiling. A task runs only while it holds one admission token
//! from its tag or, when the tag is exhausted or has no capacity, from the
//! *general* pool. Tokens return when the task finishes, and its value or
//! failure is routed to a per-task handler, a pool-wide handler, or a result
//! iterator.
//!
//! ## Key Features
//!
//! - **Per-tag ceilings**: at most `capacity` tasks of a tag hold its tokens
//! - **General overflow**: untagged capacity absorbs bursts from any tag
//! - **Elastic capacity**: grow or shrink a tag at runtime, optionally moving
//!   slots to and from the general pool; shrinking waits for running tasks
//! - **Ingest streams**: feed a whole sequence through the pool from a
//!   background thread
//! - **Completion-order iteration** with quiescence detection
//! - **Pluggable substrate**: any executor implementing
//!   [`ExecutionSubstrate`](core::ExecutionSubstrate); OS threads by default
//!
//! ## Example
//!
//! ```rust,no_run
//! use tagged_pool::core::TagPool;
//!
//! let pool = TagPool::<u32>::builder()
//!     .tag("test", 1)
//!     .tag("ignore", 1)
//!     .iteration(true)
//!     .build()?;
//!
//! pool.ingest(1..=8, "test", |n: u32| Ok(n))?;
//! let sum: u32 = pool.iter()?.sum();
//! assert_eq!(sum, 36);
//! # Ok::<(), tagged_pool::core::PoolError>(())
//! ```
//!
//! ## Elastic Capacity
//!
//! ```rust,no_run
//! use tagged_pool::core::TagPool;
//!
//! let pool = TagPool::<()>::builder().limit(8).tag("gpu", 1).build()?;
//! // Borrow three slots from the general pool for `gpu`.
//! pool.adjust("gpu", 4, true)?;
//! // Give them back; blocks until running `gpu` tasks release tokens.
//! pool.adjust("gpu", 1, true)?;
//! # Ok::<(), tagged_pool::core::PoolError>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tags, admission tokens, the pool and its background loops.
pub mod core;
/// Configuration models for tag layouts and poll intervals.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Shared utilities.
pub mod util;

pub use crate::builders::TagPoolBuilder;
pub use crate::config::{PollIntervals, PoolConfig};
pub use crate::core::{Admission, PoolError, Tag, TagPool, TaskFailure, TaskOptions};
