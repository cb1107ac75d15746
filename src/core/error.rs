//! Error types for pool operations.

use thiserror::Error;

use crate::core::Tag;

/// Invalid pool configuration, surfaced synchronously to the caller.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The sum of all tag capacities is zero.
    #[error("invalid quantity of workers: total capacity must be greater than 0")]
    ZeroCapacity,
    /// The pool-wide limit is smaller than the capacities reserved by tags.
    #[error("limit {limit} is below the {reserved} slots reserved by tags")]
    LimitBelowTags {
        /// Requested pool-wide limit.
        limit: usize,
        /// Sum of the tag capacities.
        reserved: usize,
    },
    /// Neither the tag nor the general pool can admit work.
    #[error("no admission pool for tag `{0}`")]
    NoAdmissionPool(Tag),
    /// Iteration and a pool-wide callback were both enabled.
    #[error("cannot iterate while a pool-wide callback is registered")]
    CallbackWithIteration,
    /// `iter()` was called on a pool built without iteration.
    #[error("iteration is disabled on this pool")]
    IterationDisabled,
    /// A transferring adjust needs more capacity than the general pool has.
    #[error("unable to move {requested} slots from the general pool ({available} available)")]
    InsufficientGeneralCapacity {
        /// Slots the adjust needed to move.
        requested: usize,
        /// Capacity of the general pool at the time.
        available: usize,
    },
    /// A poll interval was configured as zero.
    #[error("poll interval `{0}` must be greater than 0")]
    InvalidInterval(&'static str),
    /// Configuration text could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// An environment variable held an unusable value.
    #[error("environment variable `{name}` invalid: {reason}")]
    Env {
        /// Variable name.
        name: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// A unit of work did not produce a value.
#[derive(Debug, Error)]
pub enum TaskFailure {
    /// The job returned an error.
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),
    /// The job panicked on its worker.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The substrate shut down before the job started.
    #[error("task abandoned by the execution substrate")]
    Abandoned,
    /// The handle had no value to give (already taken or never resolved).
    #[error("task result lost")]
    Lost,
}

/// Errors produced by the pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid configuration or call.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A task failed and no handler was configured at any level.
    #[error("unhandled task failure on tag `{tag}`: {failure} (use on_error() to set a handler)")]
    UnhandledTaskFailure {
        /// Tag the task was submitted under.
        tag: Tag,
        /// The failure that went unhandled.
        failure: TaskFailure,
    },
    /// The result monitor stopped after a fault and will not be restarted.
    #[error("result monitor faulted: {0}")]
    MonitorFault(String),
    /// The execution substrate rejected an operation.
    #[error("execution substrate error: {0}")]
    Substrate(String),
    /// A background thread could not be spawned.
    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
    /// Internal error (thread panic, channel closed, etc.).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for job bodies; any error becomes a [`TaskFailure::Failed`].
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NoAdmissionPool(Tag::from("gpu"));
        assert_eq!(err.to_string(), "no admission pool for tag `gpu`");

        let err = ConfigError::InsufficientGeneralCapacity { requested: 4, available: 1 };
        assert_eq!(
            err.to_string(),
            "unable to move 4 slots from the general pool (1 available)"
        );
    }

    #[test]
    fn test_pool_error_wraps_config() {
        let err: PoolError = ConfigError::ZeroCapacity.into();
        assert!(matches!(err, PoolError::Config(ConfigError::ZeroCapacity)));
        assert!(err.to_string().starts_with("configuration error"));
    }

    #[test]
    fn test_task_failure_display_includes_chain() {
        let inner = anyhow::anyhow!("disk full").context("writing shard");
        let err = TaskFailure::Failed(inner);
        assert_eq!(err.to_string(), "task failed: writing shard: disk full");
    }
}
