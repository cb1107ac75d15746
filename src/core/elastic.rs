//! Elastic capacity: growing and shrinking a tag while work is in flight.

use std::time::Duration;

use tracing::{debug, info};

use crate::core::{CapacityRegistry, ConfigError, PoolError, Tag};

/// Outcome of a successful [`CapacityRegistry::adjust`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    /// Capacity of the tag before the change (0 if it was created).
    pub previous: usize,
    /// Capacity of the tag after the change.
    pub current: usize,
    /// Total capacity across all tags after the change.
    pub total: usize,
}

impl CapacityRegistry {
    /// Move a tag's ceiling to `new_limit`.
    ///
    /// Unknown tags are created directly. Growing grants tokens; shrinking
    /// retires free tokens one at a time, blocking until in-flight tasks hand
    /// enough of them back. With `transfer_from_general` every granted slot is
    /// taken from the general pool and every retired slot is given to it.
    /// A slot is moved by first reserving a free token and then changing both
    /// ceilings in one committed step, so capacity snapshots never see it
    /// half-moved.
    ///
    /// The whole sequence, including `resize_substrate(total)`, runs under the
    /// registry's resize lock. `keep_waiting` is consulted while blocked; if it
    /// returns `false` the adjust stops where it is with
    /// [`PoolError::MonitorFault`].
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InsufficientGeneralCapacity`] when a transferring grow
    ///   needs more than the general pool holds (nothing is changed)
    /// - [`ConfigError::ZeroCapacity`] when the change would leave no capacity
    ///   anywhere (nothing is changed)
    /// - whatever `resize_substrate` returns
    pub fn adjust(
        &self,
        tag: &Tag,
        new_limit: usize,
        transfer_from_general: bool,
        poll: Duration,
        keep_waiting: &dyn Fn() -> bool,
        resize_substrate: impl FnOnce(usize) -> Result<(), PoolError>,
    ) -> Result<Adjustment, PoolError> {
        let _resize = self.resize.lock();
        let transfer = transfer_from_general && !tag.is_general();

        if transfer && !self.contains(&Tag::General) {
            self.set_tag(Tag::General, 0);
        }

        let Some(pool) = self.pool(tag) else {
            if self.total_capacity() + new_limit == 0 {
                return Err(ConfigError::ZeroCapacity.into());
            }
            self.set_tag(tag.clone(), new_limit);
            let total = self.total_capacity();
            resize_substrate(total)?;
            info!(tag = %tag, capacity = new_limit, total, "created tag");
            return Ok(Adjustment {
                previous: 0,
                current: new_limit,
                total,
            });
        };

        let previous = pool.capacity();
        let general = if transfer { self.pool(&Tag::General) } else { None };

        if previous < new_limit {
            let delta = new_limit - previous;
            if let Some(general) = &general {
                let available = general.capacity();
                if available < delta {
                    return Err(ConfigError::InsufficientGeneralCapacity {
                        requested: delta,
                        available,
                    }
                    .into());
                }
            }
            for _ in 0..delta {
                if let Some(general) = &general {
                    if !general.reserve(poll, keep_waiting) {
                        return Err(abandoned(tag));
                    }
                }
                self.commit(|| {
                    if let Some(general) = &general {
                        general.retire_reserved();
                    }
                    pool.grant();
                });
            }
        } else if previous > new_limit {
            let delta = previous - new_limit;
            if general.is_none() && self.total_capacity() == delta {
                return Err(ConfigError::ZeroCapacity.into());
            }
            for _ in 0..delta {
                if !pool.reserve(poll, keep_waiting) {
                    return Err(abandoned(tag));
                }
                self.commit(|| {
                    pool.retire_reserved();
                    if let Some(general) = &general {
                        general.grant();
                    }
                });
                debug!(tag = %tag, capacity = pool.capacity(), "retired one slot");
            }
        }

        let total = self.total_capacity();
        resize_substrate(total)?;
        info!(
            tag = %tag,
            previous,
            current = new_limit,
            transfer,
            total,
            "adjusted tag capacity"
        );
        Ok(Adjustment {
            previous,
            current: new_limit,
            total,
        })
    }
}

fn abandoned(tag: &Tag) -> PoolError {
    PoolError::MonitorFault(format!(
        "adjust of tag `{tag}` abandoned: tokens are no longer being returned"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;

    const POLL: Duration = Duration::from_millis(10);

    fn registry(entries: &[(Tag, usize)]) -> CapacityRegistry {
        let layout: BTreeMap<Tag, usize> = entries.iter().cloned().collect();
        CapacityRegistry::with_capacities(&layout).unwrap()
    }

    fn adjust(
        registry: &CapacityRegistry,
        tag: &str,
        limit: usize,
        transfer: bool,
    ) -> Result<Adjustment, PoolError> {
        registry.adjust(&Tag::from(tag), limit, transfer, POLL, &|| true, |_| Ok(()))
    }

    #[test]
    fn unknown_tag_is_created_without_transfer() {
        let registry = registry(&[(Tag::from("a"), 1)]);
        let outcome = adjust(&registry, "b", 3, true).unwrap();
        assert_eq!(outcome, Adjustment { previous: 0, current: 3, total: 4 });
        // transfer still materialises an empty general entry
        assert_eq!(registry.capacities().get(&Tag::General), Some(&0));
    }

    #[test]
    fn transfer_moves_slots_both_ways() {
        let registry = registry(&[(Tag::from("a"), 1), (Tag::General, 4)]);

        adjust(&registry, "a", 3, true).unwrap();
        let caps = registry.capacities();
        assert_eq!(caps[&Tag::from("a")], 3);
        assert_eq!(caps[&Tag::General], 2);

        adjust(&registry, "a", 0, true).unwrap();
        let caps = registry.capacities();
        assert_eq!(caps[&Tag::from("a")], 0);
        assert_eq!(caps[&Tag::General], 5);
        assert_eq!(registry.total_capacity(), 5);
    }

    #[test]
    fn insufficient_general_leaves_everything_unchanged() {
        let registry = registry(&[(Tag::from("a"), 1), (Tag::General, 2)]);
        let err = adjust(&registry, "a", 5, true).unwrap_err();
        assert!(matches!(
            err,
            PoolError::Config(ConfigError::InsufficientGeneralCapacity { requested: 4, available: 2 })
        ));
        let caps = registry.capacities();
        assert_eq!(caps[&Tag::from("a")], 1);
        assert_eq!(caps[&Tag::General], 2);
    }

    #[test]
    fn shrinking_everything_is_refused() {
        let registry = registry(&[(Tag::from("a"), 2)]);
        let err = adjust(&registry, "a", 0, false).unwrap_err();
        assert!(matches!(err, PoolError::Config(ConfigError::ZeroCapacity)));
        assert_eq!(registry.total_capacity(), 2);
    }

    #[test]
    fn shrink_blocks_until_token_returns() {
        let registry = Arc::new(registry(&[(Tag::from("a"), 2), (Tag::General, 1)]));
        let pool = registry.tokens_for(&Tag::from("a")).unwrap();
        let first = pool.try_acquire_for(POLL).unwrap();
        let second = pool.try_acquire_for(POLL).unwrap();

        let shrinker = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || adjust(&registry, "a", 1, false).map(|a| a.current))
        };
        thread::sleep(Duration::from_millis(60));
        assert!(!shrinker.is_finished());

        drop(first);
        assert_eq!(shrinker.join().unwrap().unwrap(), 1);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.available(), 0);
        drop(second);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn resize_receives_new_total() {
        let registry = registry(&[(Tag::General, 2)]);
        let mut seen = None;
        registry
            .adjust(&Tag::General, 6, true, POLL, &|| true, |total| {
                seen = Some(total);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(6));
    }
}
