//! Submission gate: trade one admission token for one dispatched task.

use std::sync::atomic::Ordering;

use tracing::{debug, trace};

use crate::core::handlers::TaskOptions;
use crate::core::pending::{PendingTask, TaskId};
use crate::core::pool::Shared;
use crate::core::substrate::Job;
use crate::core::{ConfigError, PoolError, Tag, TokenPermit};

/// Outcome of a submission that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The task holds a token and was handed to the substrate.
    Dispatched(TaskId),
    /// The pool was stopping; the task was never run.
    Stopped,
}

impl Admission {
    /// Whether the task was dispatched.
    #[must_use]
    pub const fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched(_))
    }
}

impl<R: Send + 'static> Shared<R> {
    /// Block until a token from `tag` or from the general pool is held, then
    /// dispatch `job`.
    ///
    /// Each attempt waits at most one admission interval per pool so that a
    /// stop or a monitor fault is noticed promptly.
    pub(crate) fn put(
        &self,
        tag: &Tag,
        job: Job<R>,
        options: TaskOptions<R>,
    ) -> Result<Admission, PoolError> {
        let wait = self.intervals.admission();
        loop {
            if self.lifecycle.is_stopping() {
                return Ok(Admission::Stopped);
            }
            self.lifecycle.check_fault()?;

            // Re-resolved every round: `adjust` may create either pool meanwhile.
            let own = self.registry.tokens_for(tag);
            let general = if tag.is_general() {
                None
            } else {
                self.registry.tokens_for(&Tag::General)
            };
            if own.is_none() && general.is_none() {
                return Err(ConfigError::NoAdmissionPool(tag.clone()).into());
            }

            let permit = own
                .iter()
                .chain(general.iter())
                .find_map(|pool| pool.try_acquire_for(wait));
            if let Some(permit) = permit {
                return self.dispatch(tag, permit, job, options);
            }
            trace!(tag = %tag, "no admission token yet");
        }
    }

    fn dispatch(
        &self,
        tag: &Tag,
        permit: TokenPermit,
        job: Job<R>,
        options: TaskOptions<R>,
    ) -> Result<Admission, PoolError> {
        let mut pending = self.pending.lock();
        // A stop may have landed while we waited; the permit goes back on drop.
        if self.lifecycle.is_stopping() {
            return Ok(Admission::Stopped);
        }
        let handle = self.substrate.submit(job)?;
        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        debug!(task = id, tag = %tag, source = %permit.source(), "task dispatched");

        let TaskOptions {
            on_result,
            on_error,
        } = options;
        pending.tasks.push(PendingTask {
            id,
            tag: tag.clone(),
            permit,
            handle,
            on_result,
            on_error,
        });
        drop(pending);

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(Admission::Dispatched(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_reports_dispatch() {
        assert!(Admission::Dispatched(4).is_dispatched());
        assert!(!Admission::Stopped.is_dispatched());
    }
}
