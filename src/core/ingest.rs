//! Ingest streams: background producers feeding a sequence into the gate.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::core::gate::Admission;
use crate::core::handlers::TaskOptions;
use crate::core::pool::Shared;
use crate::core::{AppResult, PoolError, Tag};

/// Identifier of an ingest stream.
pub type StreamId = u64;

#[derive(Debug, Default)]
struct StreamProgress {
    submitted: AtomicUsize,
    finished: AtomicBool,
}

/// Observer for one ingest stream, returned by
/// [`TagPool::ingest`](crate::core::TagPool::ingest).
///
/// The pool keeps ownership of the thread; dropping the handle detaches
/// nothing.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    id: StreamId,
    progress: Arc<StreamProgress>,
}

impl IngestHandle {
    /// Stream identifier, unique within the pool.
    #[must_use]
    pub const fn id(&self) -> StreamId {
        self.id
    }

    /// Elements dispatched so far.
    #[must_use]
    pub fn submitted(&self) -> usize {
        self.progress.submitted.load(Ordering::Acquire)
    }

    /// Whether the producer thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::Acquire)
    }
}

struct IngestStream {
    id: StreamId,
    thread: JoinHandle<Result<usize, PoolError>>,
}

/// Active stream ids plus the join handles of every stream not yet joined.
pub(crate) struct IngestRegistry {
    active: Arc<Mutex<HashSet<StreamId>>>,
    streams: Mutex<Vec<IngestStream>>,
    next_id: AtomicU64,
}

impl IngestRegistry {
    pub fn new() -> Self {
        Self {
            active: Arc::new(Mutex::new(HashSet::new())),
            streams: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Join every stream registered so far, including ones started while
    /// joining. Returns the first error a stream ended with.
    pub fn join_all(&self) -> Option<PoolError> {
        let mut first_error = None;
        loop {
            let streams = std::mem::take(&mut *self.streams.lock());
            if streams.is_empty() {
                return first_error;
            }
            for stream in streams {
                let outcome = stream
                    .thread
                    .join()
                    .unwrap_or_else(|_| Err(PoolError::Internal("ingest thread panicked".into())));
                match outcome {
                    Ok(count) => debug!(stream = stream.id, submitted = count, "ingest stream joined"),
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
    }
}

/// Removes the stream from the active set however its thread exits.
struct ActiveGuard {
    id: StreamId,
    active: Arc<Mutex<HashSet<StreamId>>>,
    progress: Arc<StreamProgress>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
        self.progress.finished.store(true, Ordering::Release);
    }
}

pub(crate) fn spawn_stream<R, I, T, F>(
    shared: &Arc<Shared<R>>,
    items: I,
    tag: Tag,
    job: F,
    options: TaskOptions<R>,
) -> Result<IngestHandle, PoolError>
where
    R: Send + 'static,
    I: Iterator<Item = T> + Send + 'static,
    T: Send + 'static,
    F: Fn(T) -> AppResult<R> + Send + Sync + 'static,
{
    let registry = &shared.ingest;
    let id = registry.next_id.fetch_add(1, Ordering::Relaxed);
    let progress = Arc::new(StreamProgress::default());
    // Registered before the thread starts so quiescence cannot be observed
    // in between.
    registry.active.lock().insert(id);
    let guard = ActiveGuard {
        id,
        active: Arc::clone(&registry.active),
        progress: Arc::clone(&progress),
    };

    let worker_shared = Arc::clone(shared);
    let job = Arc::new(job);
    let spawned = thread::Builder::new()
        .name(format!("tp-ingest-{id}"))
        .spawn(move || {
            let guard = guard;
            feed(&worker_shared, items, &tag, &job, &options, &guard.progress)
        });
    let thread = match spawned {
        Ok(thread) => thread,
        Err(err) => {
            // The closure was dropped with its guard; the id is already gone.
            error!(stream = id, error = %err, "failed to start ingest stream");
            return Err(err.into());
        }
    };

    registry.streams.lock().push(IngestStream { id, thread });
    debug!(stream = id, "ingest stream started");
    Ok(IngestHandle { id, progress })
}

fn feed<R, I, T, F>(
    shared: &Shared<R>,
    items: I,
    tag: &Tag,
    job: &Arc<F>,
    options: &TaskOptions<R>,
    progress: &StreamProgress,
) -> Result<usize, PoolError>
where
    R: Send + 'static,
    I: Iterator<Item = T>,
    T: Send + 'static,
    F: Fn(T) -> AppResult<R> + Send + Sync + 'static,
{
    let mut count = 0;
    for item in items {
        if shared.lifecycle.is_stopping() {
            break;
        }
        let job = Arc::clone(job);
        match shared.put(tag, Box::new(move || job(item)), options.clone()) {
            Ok(Admission::Dispatched(_)) => {
                count += 1;
                progress.submitted.store(count, Ordering::Release);
            }
            Ok(Admission::Stopped) => break,
            Err(err) => {
                warn!(tag = %tag, error = %err, "ingest stream aborted");
                return Err(err);
            }
        }
    }
    Ok(count)
}
