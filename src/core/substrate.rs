//! Execution substrate: the collaborator that actually runs units of work.
//!
//! The pool never looks at how work is executed. It only submits jobs,
//! polls the returned [`CompletionHandle`]s, and resizes the substrate to the
//! total capacity across all tags. [`ThreadSubstrate`] is the native
//! implementation; any other executor can be plugged in through
//! [`ExecutionSubstrate`].

mod native;

use std::panic::{self, AssertUnwindSafe};

use parking_lot::Mutex;

use crate::core::{AppResult, PoolError, TaskFailure};

pub use native::ThreadSubstrate;

/// A unit of work as handed to the substrate.
pub type Job<R> = Box<dyn FnOnce() -> AppResult<R> + Send + 'static>;

/// Handle to one submitted job.
pub trait CompletionHandle<R>: Send {
    /// Whether the job has resolved. Never blocks and never fails; "not yet
    /// done" is simply `false`.
    fn is_done(&self) -> bool;

    /// Take the job's outcome. Only meaningful once [`is_done`] returned
    /// `true`; otherwise, or on a second call, yields [`TaskFailure::Lost`].
    ///
    /// [`is_done`]: CompletionHandle::is_done
    fn take_value(&self) -> Result<R, TaskFailure>;
}

/// A parallel executor sized by the pool.
pub trait ExecutionSubstrate<R>: Send + Sync {
    /// Start running `job` and return a handle to poll.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Substrate`] if the substrate no longer accepts work.
    fn submit(&self, job: Job<R>) -> Result<Box<dyn CompletionHandle<R>>, PoolError>;

    /// Change the number of workers. Applies to subsequent submissions;
    /// running work is left alone.
    ///
    /// # Errors
    ///
    /// Returns an error if new workers cannot be started.
    fn resize(&self, workers: usize) -> Result<(), PoolError>;

    /// Stop accepting work. Jobs that never started resolve as
    /// [`TaskFailure::Abandoned`].
    fn shutdown(&self) {}
}

#[derive(Debug)]
enum SlotState<R> {
    Pending,
    Ready(Result<R, TaskFailure>),
    Taken,
}

/// Write-once outcome cell shared between a worker and a handle.
#[derive(Debug)]
pub(crate) struct ResultSlot<R> {
    state: Mutex<SlotState<R>>,
}

impl<R> ResultSlot<R> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Pending),
        }
    }

    pub(crate) fn fill(&self, outcome: Result<R, TaskFailure>) {
        let mut state = self.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Ready(outcome);
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.state.lock(), SlotState::Pending)
    }

    pub(crate) fn take(&self) -> Result<R, TaskFailure> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Taken) {
            SlotState::Ready(outcome) => outcome,
            SlotState::Pending => {
                *state = SlotState::Pending;
                Err(TaskFailure::Lost)
            }
            SlotState::Taken => Err(TaskFailure::Lost),
        }
    }
}

/// Run a job, turning a panic into a [`TaskFailure::Panicked`].
pub(crate) fn run_job<R>(job: Job<R>) -> Result<R, TaskFailure> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(TaskFailure::Failed(err)),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".into());
            Err(TaskFailure::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_yields_value_once() {
        let slot = ResultSlot::new();
        assert!(!slot.is_done());
        assert!(matches!(slot.take(), Err(TaskFailure::Lost)));
        assert!(!slot.is_done());

        slot.fill(Ok(7));
        slot.fill(Ok(8));
        assert!(slot.is_done());
        assert_eq!(slot.take().unwrap(), 7);
        assert!(matches!(slot.take(), Err(TaskFailure::Lost)));
    }

    #[test]
    fn run_job_classifies_outcomes() {
        assert_eq!(run_job(Box::new(|| -> AppResult<i32> { Ok(3) })).unwrap(), 3);

        let err = run_job(Box::new(|| -> AppResult<i32> { Err(anyhow::anyhow!("bad input")) }))
            .unwrap_err();
        assert!(matches!(err, TaskFailure::Failed(_)));

        let err = run_job(Box::new(|| -> AppResult<i32> { panic!("worker exploded") }))
            .unwrap_err();
        match err {
            TaskFailure::Panicked(message) => assert_eq!(message, "worker exploded"),
            other => panic!("unexpected failure: {other:?}"),
        }
    }
}
