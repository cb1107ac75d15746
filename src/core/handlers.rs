//! Result and error handlers, pool-wide and per task.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::error;

use crate::core::{Tag, TaskFailure};

/// Receives the value of a successful task.
pub type ResultHandler<R> = Arc<dyn Fn(R) + Send + Sync>;

/// Receives the failure of a task.
pub type ErrorHandler = Arc<dyn Fn(TaskFailure) + Send + Sync>;

/// What the pool does with a failure no per-task handler claimed.
#[derive(Clone, Default)]
pub enum ErrorPolicy {
    /// Log the failure and carry on.
    #[default]
    Log,
    /// Hand the failure to a caller-supplied handler.
    Handler(ErrorHandler),
    /// No handler at all: the failure faults the result monitor.
    Unhandled,
}

impl fmt::Debug for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => write!(f, "Log"),
            Self::Handler(_) => write!(f, "Handler(..)"),
            Self::Unhandled => write!(f, "Unhandled"),
        }
    }
}

/// Per-task overrides of the pool-wide handlers.
pub struct TaskOptions<R> {
    pub(crate) on_result: Option<ResultHandler<R>>,
    pub(crate) on_error: Option<ErrorHandler>,
}

impl<R> TaskOptions<R> {
    /// No overrides; the pool-wide handlers apply.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            on_result: None,
            on_error: None,
        }
    }

    /// Route this task's value to `handler` instead of the pool-wide sink.
    #[must_use]
    pub fn on_result(mut self, handler: impl Fn(R) + Send + Sync + 'static) -> Self {
        self.on_result = Some(Arc::new(handler));
        self
    }

    /// Route this task's failure to `handler` instead of the pool policy.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl<R> Default for TaskOptions<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for TaskOptions<R> {
    fn clone(&self) -> Self {
        Self {
            on_result: self.on_result.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<R> fmt::Debug for TaskOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("on_result", &self.on_result.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Default failure handler: log and continue.
pub(crate) fn log_failure(tag: &Tag, failure: &TaskFailure) {
    error!(tag = %tag, error = %failure, "task failed");
}

/// Call a user handler, containing any panic so the monitor survives it.
pub(crate) fn invoke<T>(handler: &(dyn Fn(T) + Send + Sync), arg: T, tag: &Tag, kind: &str) {
    if panic::catch_unwind(AssertUnwindSafe(|| handler(arg))).is_err() {
        error!(tag = %tag, handler = kind, "handler panicked; continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn invoke_contains_panics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: ResultHandler<u32> = Arc::new(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            assert!(value < 10, "value too large");
        });

        invoke(handler.as_ref(), 3, &Tag::General, "result");
        invoke(handler.as_ref(), 30, &Tag::General, "result");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn options_start_empty() {
        let options: TaskOptions<u32> = TaskOptions::default();
        assert!(options.on_result.is_none());
        assert!(options.on_error.is_none());

        let options = options.on_result(|_| {}).on_error(|_| {});
        let copy = options.clone();
        assert!(copy.on_result.is_some());
        assert!(copy.on_error.is_some());
    }

    #[test]
    fn default_policy_logs() {
        assert!(matches!(ErrorPolicy::default(), ErrorPolicy::Log));
    }
}
