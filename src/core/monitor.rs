//! Result monitor: reconciles finished tasks, returns their tokens and
//! routes their outcomes.
//!
//! The monitor is the only consumer of the pending set. It polls instead of
//! waiting on notifications so that any substrate whose handles expose a
//! non-blocking `is_done` can be plugged in.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace};

use crate::core::handlers::{self, ErrorPolicy};
use crate::core::pending::PendingTask;
use crate::core::pool::Shared;
use crate::core::PoolError;

pub(crate) type MonitorHandle = JoinHandle<Result<(), PoolError>>;

/// Start the monitor thread.
///
/// A loop that ends with an error has already recorded the fault, so callers
/// see it without joining the thread.
pub(crate) fn spawn<R: Send + 'static>(shared: Arc<Shared<R>>) -> Result<MonitorHandle, PoolError> {
    let handle = thread::Builder::new()
        .name("tp-monitor".into())
        .spawn(move || {
            debug!("result monitor started");
            let outcome = run(&shared);
            match &outcome {
                Ok(()) => debug!("result monitor exiting"),
                Err(err) => error!(error = %err, "result monitor faulted"),
            }
            outcome
        })?;
    Ok(handle)
}

fn run<R: Send + 'static>(shared: &Shared<R>) -> Result<(), PoolError> {
    loop {
        thread::sleep(shared.intervals.monitor());

        let finished = shared.pending.take_finished();
        if !finished.is_empty() {
            trace!(count = finished.len(), "reconciling finished tasks");
        }
        let mut fault = None;
        for task in finished {
            if let Err(err) = reconcile(shared, task) {
                // Visible before the task stops counting as pending.
                shared.lifecycle.record_fault(&err);
                fault.get_or_insert(err);
            }
            shared.pending.settled();
        }
        if let Some(err) = fault {
            return Err(err);
        }

        if shared.lifecycle.is_stopping() && shared.pending.lock().is_quiet() {
            return Ok(());
        }
    }
}

fn reconcile<R: Send + 'static>(shared: &Shared<R>, task: PendingTask<R>) -> Result<(), PoolError> {
    let PendingTask {
        id,
        tag,
        permit,
        handle,
        on_result,
        on_error,
    } = task;
    let outcome = handle.take_value();
    // The token goes back to whichever pool supplied it before any handler runs.
    drop(permit);

    let counters = &shared.counters;
    let stopping = shared.lifecycle.is_stopping();
    match outcome {
        Ok(value) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            if stopping {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                trace!(task = id, tag = %tag, "value discarded while stopping");
                return Ok(());
            }
            if let Some(handler) = on_result {
                handlers::invoke(handler.as_ref(), value, &tag, "on_result");
                return Ok(());
            }
            let callback = shared.callback.read().clone();
            if let Some(callback) = callback {
                handlers::invoke(callback.as_ref(), value, &tag, "callback");
            } else if let Some(channel) = shared.results.as_ref() {
                channel.push(value);
            } else {
                counters.discarded.fetch_add(1, Ordering::Relaxed);
                trace!(task = id, tag = %tag, "no result sink; value dropped");
            }
            Ok(())
        }
        Err(failure) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            if stopping {
                debug!(task = id, tag = %tag, error = %failure, "failure discarded while stopping");
                return Ok(());
            }
            if let Some(handler) = on_error {
                handlers::invoke(handler.as_ref(), failure, &tag, "on_error");
                return Ok(());
            }
            let policy = shared.error_policy.read().clone();
            match policy {
                ErrorPolicy::Log => {
                    handlers::log_failure(&tag, &failure);
                    Ok(())
                }
                ErrorPolicy::Handler(handler) => {
                    handlers::invoke(handler.as_ref(), failure, &tag, "on_error");
                    Ok(())
                }
                ErrorPolicy::Unhandled => Err(PoolError::UnhandledTaskFailure { tag, failure }),
            }
        }
    }
}
