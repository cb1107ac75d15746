//! Capacity registry: per-tag ceilings and their admission tokens.
//!
//! Each tag owns a [`TokenPool`], a counting primitive built on a
//! `parking_lot` mutex and condvar. Tokens leave a pool only as a
//! [`TokenPermit`], which puts its token back into the same pool when dropped,
//! so a token can never be returned twice or to the wrong tag.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::warn;

use crate::core::{ConfigError, Tag};

#[derive(Debug)]
struct TokenState {
    capacity: usize,
    available: usize,
}

/// Counting admission pool for one tag.
///
/// `available` never exceeds `capacity`; tokens currently held by in-flight
/// tasks account for the difference.
#[derive(Debug)]
pub struct TokenPool {
    tag: Tag,
    state: Mutex<TokenState>,
    returned: Condvar,
}

impl TokenPool {
    /// Create a pool with every token available.
    #[must_use]
    pub fn new(tag: Tag, capacity: usize) -> Self {
        Self {
            tag,
            state: Mutex::new(TokenState {
                capacity,
                available: capacity,
            }),
            returned: Condvar::new(),
        }
    }

    /// Tag that owns this pool.
    #[must_use]
    pub const fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Current ceiling.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Tokens not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Take one token, waiting at most `timeout` for one to come back.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn try_acquire_for(self: &Arc<Self>, timeout: Duration) -> Option<TokenPermit> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        while state.available == 0 {
            match deadline {
                Some(deadline) => {
                    if self.returned.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.returned.wait(&mut state),
            }
        }
        if state.available == 0 {
            return None;
        }
        state.available -= 1;
        Some(TokenPermit {
            pool: Arc::clone(self),
        })
    }

    /// Raise the ceiling by one and make the new token available.
    pub(crate) fn grant(&self) {
        let mut state = self.state.lock();
        state.capacity += 1;
        state.available += 1;
        drop(state);
        self.returned.notify_one();
    }

    /// Take one free token out of circulation, leaving the ceiling alone.
    ///
    /// Blocks until a token is free, re-checking `keep_waiting` every `poll`.
    /// Returns `false` without changing anything if `keep_waiting` gives up
    /// or the pool is already empty. A reserved token is only ever consumed
    /// by [`TokenPool::retire_reserved`].
    pub(crate) fn reserve(&self, poll: Duration, keep_waiting: &dyn Fn() -> bool) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.capacity == 0 {
                return false;
            }
            if state.available > 0 {
                state.available -= 1;
                return true;
            }
            if !keep_waiting() {
                return false;
            }
            self.returned.wait_for(&mut state, poll);
        }
    }

    /// Lower the ceiling by one, consuming a token taken by `reserve`.
    pub(crate) fn retire_reserved(&self) {
        let mut state = self.state.lock();
        state.capacity = state.capacity.saturating_sub(1);
    }

    fn release(&self) {
        let mut state = self.state.lock();
        if state.available >= state.capacity {
            warn!(tag = %self.tag, capacity = state.capacity, "token released into a full pool; ignoring");
            return;
        }
        state.available += 1;
        drop(state);
        self.returned.notify_one();
    }
}

/// One admission token held by an in-flight task.
///
/// Dropping the permit releases the token into the pool that issued it.
#[derive(Debug)]
pub struct TokenPermit {
    pool: Arc<TokenPool>,
}

impl TokenPermit {
    /// Tag whose pool supplied this token.
    #[must_use]
    pub fn source(&self) -> &Tag {
        self.pool.tag()
    }
}

impl Drop for TokenPermit {
    fn drop(&mut self) {
        self.pool.release();
    }
}

/// Per-tag capacity map.
///
/// Lookups take a brief read lock on the map. Read-modify-write sequences
/// (see [`CapacityRegistry::adjust`]) hold `resize`, so no two adjustments
/// interleave. Every capacity change is applied under the `ledger` write
/// lock and every capacity snapshot under its read lock, so a slot moving
/// between two tags is never observed half-moved.
#[derive(Debug, Default)]
pub struct CapacityRegistry {
    pub(crate) tags: RwLock<BTreeMap<Tag, Arc<TokenPool>>>,
    pub(crate) resize: Mutex<()>,
    ledger: RwLock<()>,
}

impl CapacityRegistry {
    /// Build a registry from an initial tag layout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroCapacity`] if the capacities sum to zero.
    pub fn with_capacities(capacities: &BTreeMap<Tag, usize>) -> Result<Self, ConfigError> {
        let registry = Self::default();
        for (tag, capacity) in capacities {
            registry.set_tag(tag.clone(), *capacity);
        }
        if registry.total_capacity() == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(registry)
    }

    /// Create or overwrite a tag with a fully available pool.
    pub fn set_tag(&self, tag: Tag, capacity: usize) {
        let pool = Arc::new(TokenPool::new(tag.clone(), capacity));
        let _ledger = self.ledger.write();
        self.tags.write().insert(tag, pool);
    }

    /// Apply one capacity change as a single step for snapshot readers.
    pub(crate) fn commit<T>(&self, step: impl FnOnce() -> T) -> T {
        let _ledger = self.ledger.write();
        step()
    }

    /// Sum of every tag's capacity.
    #[must_use]
    pub fn total_capacity(&self) -> usize {
        let _ledger = self.ledger.read();
        self.tags.read().values().map(|pool| pool.capacity()).sum()
    }

    /// The tag's pool, or `None` if the tag is unknown or has no capacity.
    #[must_use]
    pub fn tokens_for(&self, tag: &Tag) -> Option<Arc<TokenPool>> {
        self.tags
            .read()
            .get(tag)
            .filter(|pool| pool.capacity() > 0)
            .cloned()
    }

    /// Whether the tag has an entry, regardless of its capacity.
    #[must_use]
    pub fn contains(&self, tag: &Tag) -> bool {
        self.tags.read().contains_key(tag)
    }

    /// Snapshot of `tag -> capacity`.
    #[must_use]
    pub fn capacities(&self) -> BTreeMap<Tag, usize> {
        let _ledger = self.ledger.read();
        self.tags
            .read()
            .iter()
            .map(|(tag, pool)| (tag.clone(), pool.capacity()))
            .collect()
    }

    /// Snapshot of `tag -> free tokens`.
    #[must_use]
    pub fn available(&self) -> BTreeMap<Tag, usize> {
        self.tags
            .read()
            .iter()
            .map(|(tag, pool)| (tag.clone(), pool.available()))
            .collect()
    }

    pub(crate) fn pool(&self, tag: &Tag) -> Option<Arc<TokenPool>> {
        self.tags.read().get(tag).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(20);

    fn pool(capacity: usize) -> Arc<TokenPool> {
        Arc::new(TokenPool::new(Tag::from("t"), capacity))
    }

    #[test]
    fn permits_return_on_drop() {
        let pool = pool(2);
        let a = pool.try_acquire_for(SHORT).unwrap();
        let b = pool.try_acquire_for(SHORT).unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire_for(SHORT).is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn acquire_wakes_on_release() {
        let pool = pool(1);
        let held = pool.try_acquire_for(SHORT).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.try_acquire_for(Duration::from_secs(5)).is_some())
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn acquire_with_unbounded_timeout() {
        let pool = pool(1);
        let held = pool.try_acquire_for(Duration::MAX).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.try_acquire_for(Duration::MAX).is_some())
        };
        thread::sleep(Duration::from_millis(50));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn grant_and_retire_move_capacity() {
        let pool = pool(1);
        pool.grant();
        assert_eq!((pool.capacity(), pool.available()), (2, 2));

        assert!(pool.reserve(SHORT, &|| true));
        assert_eq!((pool.capacity(), pool.available()), (2, 1));
        pool.retire_reserved();
        assert!(pool.reserve(SHORT, &|| true));
        pool.retire_reserved();
        assert_eq!((pool.capacity(), pool.available()), (0, 0));
        assert!(!pool.reserve(SHORT, &|| true));
    }

    #[test]
    fn reserve_waits_for_held_token() {
        let pool = pool(1);
        let held = pool.try_acquire_for(SHORT).unwrap();

        let shrinker = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.reserve(SHORT, &|| true))
        };
        thread::sleep(Duration::from_millis(60));
        assert!(!shrinker.is_finished());
        drop(held);
        assert!(shrinker.join().unwrap());
        assert_eq!((pool.capacity(), pool.available()), (1, 0));
        pool.retire_reserved();
        assert_eq!((pool.capacity(), pool.available()), (0, 0));
    }

    #[test]
    fn reserve_gives_up_when_told() {
        let pool = pool(1);
        let _held = pool.try_acquire_for(SHORT).unwrap();
        assert!(!pool.reserve(SHORT, &|| false));
        assert_eq!(pool.capacity(), 1);
    }

    #[test]
    fn snapshots_see_whole_steps() {
        let mut layout = BTreeMap::new();
        layout.insert(Tag::from("a"), 1);
        layout.insert(Tag::General, 3);
        let registry = Arc::new(CapacityRegistry::with_capacities(&layout).unwrap());
        let a = registry.pool(&Tag::from("a")).unwrap();
        let general = registry.pool(&Tag::General).unwrap();

        let reader = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                (0..2_000)
                    .filter(|_| registry.capacities().values().sum::<usize>() != 4)
                    .count()
            })
        };
        for _ in 0..500 {
            assert!(general.reserve(SHORT, &|| true));
            registry.commit(|| {
                general.retire_reserved();
                a.grant();
            });
            assert!(a.reserve(SHORT, &|| true));
            registry.commit(|| {
                a.retire_reserved();
                general.grant();
            });
        }
        assert_eq!(reader.join().unwrap(), 0);
        assert_eq!(registry.available()[&Tag::General], 3);
    }

    #[test]
    fn zero_capacity_tags_do_not_gate() {
        let mut layout = BTreeMap::new();
        layout.insert(Tag::from("idle"), 0);
        layout.insert(Tag::General, 2);
        let registry = CapacityRegistry::with_capacities(&layout).unwrap();

        assert!(registry.contains(&Tag::from("idle")));
        assert!(registry.tokens_for(&Tag::from("idle")).is_none());
        assert!(registry.tokens_for(&Tag::from("missing")).is_none());
        assert!(registry.tokens_for(&Tag::General).is_some());
        assert_eq!(registry.total_capacity(), 2);
    }

    #[test]
    fn empty_layout_is_rejected() {
        let err = CapacityRegistry::with_capacities(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity));
    }
}
