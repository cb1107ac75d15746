//! Pool state: running, stopping, and the monitor fault record.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::core::PoolError;

#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    stopping: AtomicBool,
    faulted: AtomicBool,
    fault: Mutex<Option<String>>,
}

impl Lifecycle {
    /// Enter `stopping`. Returns `true` for the call that made the transition.
    pub fn stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn record_fault(&self, err: &PoolError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(err.to_string());
        }
        drop(fault);
        self.faulted.store(true, Ordering::Release);
    }

    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Fail fast once the monitor is gone.
    pub fn check_fault(&self) -> Result<(), PoolError> {
        if self.is_faulted() {
            return Err(PoolError::MonitorFault(
                self.fault().unwrap_or_else(|| "unknown fault".into()),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_one_way() {
        let lifecycle = Lifecycle::default();
        assert!(!lifecycle.is_stopping());
        assert!(lifecycle.stop());
        assert!(!lifecycle.stop());
        assert!(lifecycle.is_stopping());
    }

    #[test]
    fn first_fault_wins() {
        let lifecycle = Lifecycle::default();
        assert!(lifecycle.check_fault().is_ok());

        lifecycle.record_fault(&PoolError::Internal("first".into()));
        lifecycle.record_fault(&PoolError::Internal("second".into()));
        assert_eq!(lifecycle.fault().as_deref(), Some("internal error: first"));
        assert!(matches!(lifecycle.check_fault(), Err(PoolError::MonitorFault(_))));
    }
}
