//! Pending set: dispatched tasks that have not been reconciled yet.

use parking_lot::{Mutex, MutexGuard};

use crate::core::handlers::{ErrorHandler, ResultHandler};
use crate::core::substrate::CompletionHandle;
use crate::core::{Tag, TokenPermit};

/// Identifier assigned to each dispatched task.
pub type TaskId = u64;

/// One dispatched unit of work.
pub(crate) struct PendingTask<R> {
    pub id: TaskId,
    /// Tag the caller asked for.
    pub tag: Tag,
    /// Token held until the task resolves; knows which pool supplied it.
    pub permit: TokenPermit,
    pub handle: Box<dyn CompletionHandle<R>>,
    pub on_result: Option<ResultHandler<R>>,
    pub on_error: Option<ErrorHandler>,
}

pub(crate) struct PendingInner<R> {
    pub tasks: Vec<PendingTask<R>>,
    /// Tasks taken out for reconciliation whose handlers have not finished.
    pub settling: usize,
}

impl<R> PendingInner<R> {
    pub fn is_quiet(&self) -> bool {
        self.tasks.is_empty() && self.settling == 0
    }
}

pub(crate) struct PendingSet<R> {
    inner: Mutex<PendingInner<R>>,
}

impl<R> PendingSet<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PendingInner {
                tasks: Vec::new(),
                settling: 0,
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, PendingInner<R>> {
        self.inner.lock()
    }

    /// Remove every task whose handle has resolved. They keep counting as
    /// pending until [`PendingSet::settled`] is called for each.
    pub fn take_finished(&self) -> Vec<PendingTask<R>> {
        let mut inner = self.inner.lock();
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.tasks)
            .into_iter()
            .partition(|task| task.handle.is_done());
        inner.tasks = running;
        inner.settling += finished.len();
        finished
    }

    pub fn settled(&self) {
        let mut inner = self.inner.lock();
        inner.settling = inner.settling.saturating_sub(1);
    }

    /// Dispatched tasks, including those whose handlers are still running.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.tasks.len() + inner.settling
    }
}
