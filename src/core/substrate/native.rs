//! Native substrate using dedicated OS threads.
//!
//! Workers block on a shared `crossbeam-channel` queue, so there is no idle
//! polling. Growing spawns new workers; shrinking enqueues one retire marker
//! per surplus worker, which lands behind already queued work so nothing in
//! flight is disturbed. Shutdown drops the sender, and any job still queued
//! resolves as [`TaskFailure::Abandoned`].

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{run_job, CompletionHandle, ExecutionSubstrate, Job, ResultSlot};
use crate::core::{PoolError, TaskFailure};

struct WorkItem<R> {
    job: Job<R>,
    slot: Arc<ResultSlot<R>>,
}

enum Envelope<R> {
    Run(WorkItem<R>),
    Retire,
}

struct ThreadHandle<R> {
    slot: Arc<ResultSlot<R>>,
}

impl<R: Send> CompletionHandle<R> for ThreadHandle<R> {
    fn is_done(&self) -> bool {
        self.slot.is_done()
    }

    fn take_value(&self) -> Result<R, TaskFailure> {
        self.slot.take()
    }
}

/// Resizable pool of worker threads.
pub struct ThreadSubstrate<R> {
    /// Job sender. `None` once shut down.
    task_tx: Mutex<Option<Sender<Envelope<R>>>>,
    task_rx: Receiver<Envelope<R>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Workers that should be alive once pending retire markers are consumed.
    target: AtomicUsize,
    next_worker_id: AtomicUsize,
    shutdown: Arc<AtomicBool>,
    stack_size: Option<usize>,
}

impl<R> ThreadSubstrate<R> {
    /// Number of workers the substrate is sized to.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Whether [`ExecutionSubstrate::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.task_tx.lock().take();

        let mut abandoned = 0usize;
        while let Ok(envelope) = self.task_rx.try_recv() {
            if let Envelope::Run(item) = envelope {
                item.slot.fill(Err(TaskFailure::Abandoned));
                abandoned += 1;
            }
        }
        info!(
            workers = self.worker_count(),
            abandoned, "thread substrate shut down"
        );
    }
}

impl<R: Send + 'static> ThreadSubstrate<R> {
    /// Start a substrate with `workers` threads.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a worker thread cannot be started.
    pub fn new(workers: usize) -> Result<Self, PoolError> {
        Self::with_stack_size(workers, None)
    }

    /// Start a substrate whose worker threads use `stack_size` bytes of stack.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Spawn`] if a worker thread cannot be started.
    pub fn with_stack_size(workers: usize, stack_size: Option<usize>) -> Result<Self, PoolError> {
        let (task_tx, task_rx) = unbounded();
        let substrate = Self {
            task_tx: Mutex::new(Some(task_tx)),
            task_rx,
            workers: Mutex::new(Vec::with_capacity(workers)),
            target: AtomicUsize::new(0),
            next_worker_id: AtomicUsize::new(0),
            shutdown: Arc::new(AtomicBool::new(false)),
            stack_size,
        };
        substrate.resize(workers)?;
        Ok(substrate)
    }

    fn spawn_worker(&self) -> Result<JoinHandle<()>, PoolError> {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let task_rx = self.task_rx.clone();
        let shutdown = Arc::clone(&self.shutdown);

        let mut builder = thread::Builder::new().name(format!("tp-worker-{worker_id}"));
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder.spawn(move || worker_loop(worker_id, &task_rx, &shutdown))?;
        Ok(handle)
    }
}

impl<R: Send + 'static> ExecutionSubstrate<R> for ThreadSubstrate<R> {
    fn submit(&self, job: Job<R>) -> Result<Box<dyn CompletionHandle<R>>, PoolError> {
        let slot = Arc::new(ResultSlot::new());
        let task_tx = self.task_tx.lock();
        let Some(task_tx) = task_tx.as_ref() else {
            return Err(PoolError::Substrate("substrate has been shut down".into()));
        };
        task_tx
            .send(Envelope::Run(WorkItem {
                job,
                slot: Arc::clone(&slot),
            }))
            .map_err(|_| PoolError::Substrate("worker channel disconnected".into()))?;
        Ok(Box::new(ThreadHandle { slot }))
    }

    fn resize(&self, workers: usize) -> Result<(), PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::Substrate("substrate has been shut down".into()));
        }
        let mut handles = self.workers.lock();
        handles.retain(|handle| !handle.is_finished());

        let current = self.target.load(Ordering::Acquire);
        match workers.cmp(&current) {
            CmpOrdering::Greater => {
                for _ in current..workers {
                    handles.push(self.spawn_worker()?);
                    self.target.fetch_add(1, Ordering::AcqRel);
                }
            }
            CmpOrdering::Less => {
                let task_tx = self.task_tx.lock();
                if let Some(task_tx) = task_tx.as_ref() {
                    for _ in workers..current {
                        if task_tx.send(Envelope::Retire).is_ok() {
                            self.target.fetch_sub(1, Ordering::AcqRel);
                        }
                    }
                }
            }
            CmpOrdering::Equal => {}
        }
        debug!(from = current, to = workers, "resized thread substrate");
        Ok(())
    }

    fn shutdown(&self) {
        self.close();
    }
}

impl<R> Drop for ThreadSubstrate<R> {
    fn drop(&mut self) {
        // Workers are detached, not joined; a running job finishes on its own.
        self.close();
    }
}

fn worker_loop<R>(worker_id: usize, task_rx: &Receiver<Envelope<R>>, shutdown: &AtomicBool) {
    debug!(worker_id, "worker thread started");
    while let Ok(envelope) = task_rx.recv() {
        match envelope {
            Envelope::Run(item) => {
                if shutdown.load(Ordering::Acquire) {
                    item.slot.fill(Err(TaskFailure::Abandoned));
                    continue;
                }
                let outcome = run_job(item.job);
                item.slot.fill(outcome);
            }
            Envelope::Retire => {
                debug!(worker_id, "worker retired");
                return;
            }
        }
    }
    debug!(worker_id, "worker channel closed, exiting");
}
