//! Builder to construct a [`TagPool`] from configuration and handlers.

use std::sync::Arc;

use crate::config::{PollIntervals, PoolConfig};
use crate::core::{
    ErrorPolicy, ExecutionSubstrate, PoolError, ResultHandler, TagPool, TaskFailure,
};

/// Step-by-step construction of a [`TagPool`].
///
/// Unlike [`PoolConfig::default`], a fresh builder has no capacity at all:
/// set a [`limit`](Self::limit), at least one [`tag`](Self::tag), or both.
pub struct TagPoolBuilder<R> {
    pub(crate) config: PoolConfig,
    pub(crate) callback: Option<ResultHandler<R>>,
    pub(crate) error_policy: ErrorPolicy,
    pub(crate) substrate: Option<Arc<dyn ExecutionSubstrate<R>>>,
}

impl<R: Send + 'static> TagPoolBuilder<R> {
    /// Empty layout, default handlers, native thread substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(PoolConfig {
            limit: 0,
            ..PoolConfig::default()
        })
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn from_config(config: PoolConfig) -> Self {
        Self {
            config,
            callback: None,
            error_policy: ErrorPolicy::default(),
            substrate: None,
        }
    }

    /// Pool-wide limit. See [`PoolConfig`] for how it combines with tags.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.config.limit = limit;
        self
    }

    /// Reserve `capacity` slots for `name`. The empty name is the general pool.
    #[must_use]
    pub fn tag(mut self, name: impl Into<String>, capacity: usize) -> Self {
        self.config.tags.insert(name.into(), capacity);
        self
    }

    /// Queue results for [`TagPool::iter`].
    #[must_use]
    pub const fn iteration(mut self, enabled: bool) -> Self {
        self.config.iteration = enabled;
        self
    }

    /// Override the poll intervals.
    #[must_use]
    pub const fn intervals(mut self, intervals: PollIntervals) -> Self {
        self.config.intervals = intervals;
        self
    }

    /// Pool-wide result callback. Conflicts with iteration mode.
    #[must_use]
    pub fn callback(mut self, callback: impl Fn(R) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Pool-wide error handler, replacing the default logger.
    #[must_use]
    pub fn on_error(mut self, handler: impl Fn(TaskFailure) + Send + Sync + 'static) -> Self {
        self.error_policy = ErrorPolicy::Handler(Arc::new(handler));
        self
    }

    /// No pool-wide error handler at all; see [`TagPool::clear_error_handler`].
    #[must_use]
    pub fn without_error_handler(mut self) -> Self {
        self.error_policy = ErrorPolicy::Unhandled;
        self
    }

    /// Run tasks on `substrate` instead of the native thread substrate. It is
    /// resized to the total capacity on build.
    #[must_use]
    pub fn substrate(mut self, substrate: Arc<dyn ExecutionSubstrate<R>>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Validate the configuration and start the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Config`] for an invalid layout or for a callback
    /// combined with iteration, and [`PoolError::Spawn`] if threads cannot be
    /// started.
    pub fn build(self) -> Result<TagPool<R>, PoolError> {
        TagPool::launch(self)
    }
}

impl<R: Send + 'static> Default for TagPoolBuilder<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigError;

    #[test]
    fn builder_collects_layout() {
        let builder = TagPoolBuilder::<u8>::new()
            .tag("gpu", 2)
            .tag("", 1)
            .limit(5)
            .iteration(true);
        assert_eq!(builder.config.limit, 5);
        assert_eq!(builder.config.tags.len(), 2);
        assert!(builder.config.iteration);
        assert!(matches!(builder.error_policy, ErrorPolicy::Log));
    }

    #[test]
    fn empty_builder_has_no_capacity() {
        let err = TagPoolBuilder::<u8>::new().build().unwrap_err();
        assert!(matches!(err, PoolError::Config(ConfigError::ZeroCapacity)));
    }

    #[test]
    fn callback_and_iteration_conflict() {
        let err = TagPoolBuilder::<u8>::new()
            .limit(1)
            .iteration(true)
            .callback(|_| {})
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PoolError::Config(ConfigError::CallbackWithIteration)
        ));
    }
}
