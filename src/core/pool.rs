//! `TagPool`: the public face of the admission-control layer.
//!
//! A pool owns the capacity registry, the execution substrate, the pending
//! set, and two kinds of supervised background threads: one result monitor,
//! and one producer per [`TagPool::ingest`] call. All of them share a single
//! [`Shared`] state behind an `Arc`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::builders::TagPoolBuilder;
use crate::config::{PollIntervals, PoolConfig};
use crate::core::gate::Admission;
use crate::core::handlers::{ErrorPolicy, ResultHandler, TaskOptions};
use crate::core::ingest::{self, IngestHandle, IngestRegistry};
use crate::core::lifecycle::Lifecycle;
use crate::core::pending::PendingSet;
use crate::core::results::{ResultChannel, ResultIter};
use crate::core::stats::{PoolCounters, PoolStats};
use crate::core::substrate::{ExecutionSubstrate, ThreadSubstrate};
use crate::core::{monitor, Adjustment, AppResult, CapacityRegistry, ConfigError, PoolError, Tag, TaskFailure};

/// State shared by the pool handle, the monitor, and ingest threads.
pub(crate) struct Shared<R> {
    pub registry: CapacityRegistry,
    pub substrate: Arc<dyn ExecutionSubstrate<R>>,
    pub pending: PendingSet<R>,
    pub ingest: IngestRegistry,
    /// Present only in iteration mode.
    pub results: Option<ResultChannel<R>>,
    pub callback: RwLock<Option<ResultHandler<R>>>,
    pub error_policy: RwLock<ErrorPolicy>,
    pub lifecycle: Lifecycle,
    pub intervals: PollIntervals,
    pub counters: PoolCounters,
    pub next_task_id: AtomicU64,
}

impl<R> Shared<R> {
    /// No pending tasks and no active ingest stream.
    pub fn is_quiescent(&self) -> bool {
        self.pending.len() == 0 && self.ingest.active_count() == 0
    }
}

/// Admission-controlled pool of workers, partitioned by tag.
///
/// Every task is submitted under a [`Tag`]. A task runs only while it holds a
/// token from its tag's pool or, when that pool is exhausted or absent, from
/// the general pool. Tokens return when the result monitor reconciles the
/// finished task, after which the value or failure is routed to the task's
/// own handler, the pool-wide handler, or the result iterator.
///
/// ```rust,no_run
/// use tagged_pool::core::TagPool;
///
/// let pool = TagPool::<u64>::builder()
///     .tag("io", 2)
///     .limit(6)
///     .iteration(true)
///     .build()?;
///
/// pool.ingest(1..=8, "io", |n: u64| Ok(n * n))?;
/// let total: u64 = pool.iter()?.sum();
/// assert_eq!(total, 204);
/// # Ok::<(), tagged_pool::core::PoolError>(())
/// ```
pub struct TagPool<R: Send + 'static> {
    shared: Arc<Shared<R>>,
    monitor: Mutex<Option<JoinHandle<Result<(), PoolError>>>>,
}

impl<R: Send + 'static> TagPool<R> {
    /// Build a pool from configuration, with default handlers and the native
    /// thread substrate.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] for an invalid layout and
    /// [`PoolError::Spawn`] if threads cannot be started.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        TagPoolBuilder::from_config(config).build()
    }

    /// Start configuring a pool. The builder starts with no capacity at all.
    #[must_use]
    pub fn builder() -> TagPoolBuilder<R> {
        TagPoolBuilder::new()
    }

    pub(crate) fn launch(builder: TagPoolBuilder<R>) -> Result<Self, PoolError> {
        let TagPoolBuilder {
            config,
            callback,
            error_policy,
            substrate,
        } = builder;

        if config.iteration && callback.is_some() {
            return Err(ConfigError::CallbackWithIteration.into());
        }
        config.intervals.validate()?;
        let capacities = config.initial_capacities()?;
        let registry = CapacityRegistry::with_capacities(&capacities)?;
        let total = registry.total_capacity();

        let substrate: Arc<dyn ExecutionSubstrate<R>> = match substrate {
            Some(substrate) => {
                substrate.resize(total)?;
                substrate
            }
            None => Arc::new(ThreadSubstrate::new(total)?),
        };

        let shared = Arc::new(Shared {
            registry,
            substrate,
            pending: PendingSet::new(),
            ingest: IngestRegistry::new(),
            results: config.iteration.then(ResultChannel::new),
            callback: RwLock::new(callback),
            error_policy: RwLock::new(error_policy),
            lifecycle: Lifecycle::default(),
            intervals: config.intervals,
            counters: PoolCounters::default(),
            next_task_id: AtomicU64::new(0),
        });
        let monitor = monitor::spawn(Arc::clone(&shared))?;

        info!(
            total,
            tags = capacities.len(),
            iteration = config.iteration,
            "tag pool started"
        );
        Ok(Self {
            shared,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Submit `job` under `tag`, blocking until a token is free.
    ///
    /// Returns [`Admission::Stopped`] without running anything if the pool is
    /// stopping.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::NoAdmissionPool`] if neither the tag nor the general
    ///   pool has capacity
    /// - [`PoolError::MonitorFault`] once the result monitor has faulted
    pub fn put<F>(&self, tag: impl Into<Tag>, job: F) -> Result<Admission, PoolError>
    where
        F: FnOnce() -> AppResult<R> + Send + 'static,
    {
        self.put_with(tag, job, TaskOptions::new())
    }

    /// [`put`](Self::put) with per-task handler overrides.
    ///
    /// # Errors
    ///
    /// Same as [`put`](Self::put).
    pub fn put_with<F>(
        &self,
        tag: impl Into<Tag>,
        job: F,
        options: TaskOptions<R>,
    ) -> Result<Admission, PoolError>
    where
        F: FnOnce() -> AppResult<R> + Send + 'static,
    {
        self.shared.put(&tag.into(), Box::new(job), options)
    }

    /// Feed every element of `items` through `job` in a background thread.
    ///
    /// Returns immediately. Use [`join`](Self::join) to wait for the stream.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if the producer thread cannot start.
    pub fn ingest<I, T, F>(
        &self,
        items: I,
        tag: impl Into<Tag>,
        job: F,
    ) -> Result<IngestHandle, PoolError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        F: Fn(T) -> AppResult<R> + Send + Sync + 'static,
    {
        self.ingest_with(items, tag, job, TaskOptions::new())
    }

    /// [`ingest`](Self::ingest) with handler overrides applied to every task.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if the producer thread cannot start.
    pub fn ingest_with<I, T, F>(
        &self,
        items: I,
        tag: impl Into<Tag>,
        job: F,
        options: TaskOptions<R>,
    ) -> Result<IngestHandle, PoolError>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Send + 'static,
        F: Fn(T) -> AppResult<R> + Send + Sync + 'static,
    {
        ingest::spawn_stream(&self.shared, items.into_iter(), tag.into(), job, options)
    }

    /// Change `tag`'s capacity, creating the tag if needed.
    ///
    /// Shrinking blocks until in-flight tasks return enough tokens. With
    /// `transfer_from_general`, slots move to and from the general pool
    /// instead of changing the total. The substrate is resized afterwards.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InsufficientGeneralCapacity`] for a transfer the
    ///   general pool cannot cover
    /// - [`ConfigError::ZeroCapacity`] if no capacity would remain
    /// - [`PoolError::MonitorFault`] if tokens stop coming back
    pub fn adjust(
        &self,
        tag: impl Into<Tag>,
        new_limit: usize,
        transfer_from_general: bool,
    ) -> Result<Adjustment, PoolError> {
        let shared = &self.shared;
        shared.lifecycle.check_fault()?;
        let tag = tag.into();
        let keep_waiting = || !shared.lifecycle.is_faulted();
        shared.registry.adjust(
            &tag,
            new_limit,
            transfer_from_general,
            shared.intervals.admission(),
            &keep_waiting,
            |total| shared.substrate.resize(total),
        )
    }

    /// Send every value without a per-task handler to `callback`.
    ///
    /// While a callback is set, [`iter`](Self::iter) is unavailable.
    pub fn set_callback(&self, callback: impl Fn(R) + Send + Sync + 'static) {
        *self.shared.callback.write() = Some(Arc::new(callback));
    }

    /// Remove the pool-wide callback.
    pub fn clear_callback(&self) {
        *self.shared.callback.write() = None;
    }

    /// Send every failure without a per-task handler to `handler`.
    pub fn set_error_handler(&self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) {
        *self.shared.error_policy.write() = ErrorPolicy::Handler(Arc::new(handler));
    }

    /// Remove every pool-wide error handler, including the default logger.
    ///
    /// A failure with no per-task handler then faults the result monitor.
    pub fn clear_error_handler(&self) {
        *self.shared.error_policy.write() = ErrorPolicy::Unhandled;
    }

    /// Restore the default handler, which logs failures and continues.
    pub fn reset_error_handler(&self) {
        *self.shared.error_policy.write() = ErrorPolicy::Log;
    }

    /// Stop admitting work. One-way; running tasks are not interrupted.
    ///
    /// Ingest streams and iterators end promptly, blocked `put` calls return
    /// [`Admission::Stopped`], and values of tasks finishing afterwards are
    /// discarded.
    pub fn stop(&self) {
        if self.shared.lifecycle.stop() {
            info!(pending = self.pending(), "tag pool stopping");
        }
    }

    /// Whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.shared.lifecycle.is_stopping()
    }

    /// Wait for every ingest stream to end and every pending task to be
    /// reconciled.
    ///
    /// Once the pool is stopping, returns as soon as the ingest streams have
    /// exited, without waiting for work still running on the substrate.
    ///
    /// # Errors
    ///
    /// Returns the first error that ended an ingest stream, or the monitor
    /// fault.
    pub fn join(&self) -> Result<(), PoolError> {
        let mut first_error = None;
        loop {
            if let Some(err) = self.shared.ingest.join_all() {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
            let quiescent = self.shared.is_quiescent();
            if self.shared.lifecycle.is_faulted() {
                return Err(self.monitor_fault());
            }
            if quiescent || self.shared.lifecycle.is_stopping() {
                break;
            }
            thread::sleep(self.shared.intervals.join());
        }
        first_error.map_or(Ok(()), Err)
    }

    /// The monitor fault, if the result monitor has died.
    #[must_use]
    pub fn fault(&self) -> Option<String> {
        self.shared.lifecycle.fault()
    }

    /// Approximate number of dispatched tasks not yet reconciled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    /// Capacity of every known tag.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<Tag, usize> {
        self.shared.registry.capacities()
    }

    /// Sum of all tag capacities; also the substrate's worker count.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        self.shared.registry.total_capacity()
    }

    /// Free tokens of every known tag.
    ///
    /// A token always returns to the pool that issued it, so once the pool is
    /// idle each tag reports its full capacity again.
    #[must_use]
    pub fn available(&self) -> BTreeMap<Tag, usize> {
        self.shared.registry.available()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared
            .counters
            .snapshot(self.pending(), self.total_capacity())
    }

    /// Iterate over task values in completion order.
    ///
    /// The iterator ends once nothing is pending and no ingest stream is
    /// running, or when the pool stops.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::IterationDisabled`] if the pool was built without
    ///   iteration
    /// - [`ConfigError::CallbackWithIteration`] while a pool-wide callback is
    ///   set
    pub fn iter(&self) -> Result<ResultIter<'_, R>, PoolError> {
        let Some(channel) = self.shared.results.as_ref() else {
            return Err(ConfigError::IterationDisabled.into());
        };
        if self.shared.callback.read().is_some() {
            return Err(ConfigError::CallbackWithIteration.into());
        }
        Ok(ResultIter::new(&self.shared, channel.receiver()))
    }

    fn monitor_fault(&self) -> PoolError {
        let handle = {
            let mut monitor = self.monitor.lock();
            match monitor.as_ref() {
                Some(handle) if handle.is_finished() => monitor.take(),
                _ => None,
            }
        };
        match handle.map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => PoolError::Internal("result monitor panicked".into()),
            _ => PoolError::MonitorFault(
                self.shared
                    .lifecycle
                    .fault()
                    .unwrap_or_else(|| "unknown fault".into()),
            ),
        }
    }
}

impl<R: Send + 'static> Drop for TagPool<R> {
    fn drop(&mut self) {
        // Threads are not joined here; they exit once nothing is pending.
        self.shared.lifecycle.stop();
        self.shared.substrate.shutdown();
        if self.monitor.lock().as_ref().is_some_and(JoinHandle::is_finished) {
            debug!("result monitor already exited");
        } else if self.shared.pending.len() > 0 {
            warn!(pending = self.shared.pending.len(), "tag pool dropped with tasks in flight");
        }
    }
}

impl<R: Send + 'static> fmt::Display for TagPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags = self
            .tags()
            .into_iter()
            .map(|(tag, capacity)| format!("{tag}: {capacity}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "<TagPool: {{{tags}}} || Total: {}>", self.total_capacity())
    }
}

impl<R: Send + 'static> fmt::Debug for TagPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagPool")
            .field("tags", &self.tags())
            .field("pending", &self.pending())
            .field("stopping", &self.is_stopping())
            .finish_non_exhaustive()
    }
}
