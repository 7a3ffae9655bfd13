//! # Summary
//!
//! Per-slot working memory for the protocol: an allocator of mutable
//! ballot state, and a separate store of decided values. Both reclaim
//! entries behind a monotonically advancing watermark once every peer
//! has declared it no longer needs them.

use std::sync::Arc;

use hashbrown::HashMap as Map;
use parking_lot::Mutex;

use crate::state;

/// Mutable ballot state for one slot. Guarded by its own lock so
/// unrelated slots never contend.
#[derive(Debug)]
pub struct Instance<V> {
    /// Highest ballot this peer has promised to honor
    pub promised: i64,

    /// Highest-ballot accepted proposal, if any
    pub accepted: Option<(i64, V)>,
}

impl<V> Default for Instance<V> {
    fn default() -> Self {
        Instance {
            promised: -1,
            accepted: None,
        }
    }
}

/// Lazily allocates ballot state per slot, and evicts it once the
/// watermark passes.
pub struct Instances<V> {
    inner: Mutex<Bounded<Arc<Mutex<Instance<V>>>>>,
}

struct Bounded<T> {
    entries: Map<i64, T>,
    bound: i64,
}

impl<T> Default for Bounded<T> {
    fn default() -> Self {
        Bounded {
            entries: Map::default(),
            bound: -1,
        }
    }
}

impl<V: state::Value> Instances<V> {
    pub fn new() -> Self {
        Instances {
            inner: Mutex::new(Bounded::default()),
        }
    }

    /// Returns the ballot state for `seq`, allocating it on first
    /// reference. A slot at or below the watermark is already fully
    /// resolved; it gets a fresh, never-stored instance whose fate is
    /// irrelevant.
    pub fn create(&self, seq: i64) -> Arc<Mutex<Instance<V>>> {
        let mut inner = self.inner.lock();
        if seq <= inner.bound {
            return Arc::new(Mutex::new(Instance::default()));
        }
        inner
            .entries
            .entry(seq)
            .or_insert_with(|| Arc::new(Mutex::new(Instance::default())))
            .clone()
    }

    /// Raises the watermark to `bound` and evicts every slot at or
    /// below it. No-op unless `bound` actually advances.
    pub fn done(&self, bound: i64) {
        let mut inner = self.inner.lock();
        if bound > inner.bound {
            inner.entries.retain(|seq, _| *seq > bound);
            inner.bound = bound;
        }
    }
}

/// Write-once store of decided values, reclaimed behind the same kind
/// of watermark as [`Instances`].
pub struct Decisions<V> {
    inner: Mutex<Bounded<V>>,
}

impl<V: state::Value> Decisions<V> {
    pub fn new() -> Self {
        Decisions {
            inner: Mutex::new(Bounded::default()),
        }
    }

    pub fn read(&self, seq: i64) -> Option<V> {
        self.inner.lock().entries.get(&seq).cloned()
    }

    /// Records the decided value for `seq`. Deciding is idempotent: a
    /// slot that already holds a value keeps it, and a slot behind the
    /// watermark is already reclaimed and stays that way.
    pub fn write(&self, seq: i64, value: V) {
        let mut inner = self.inner.lock();
        if seq > inner.bound {
            inner.entries.entry(seq).or_insert(value);
        }
    }

    pub fn done(&self, bound: i64) {
        let mut inner = self.inner.lock();
        if bound > inner.bound {
            inner.entries.retain(|seq, _| *seq > bound);
            inner.bound = bound;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_is_shared_until_reclaimed() {
        let instances = Instances::<String>::new();
        let first = instances.create(5);
        first.lock().promised = 3;
        let second = instances.create(5);
        assert_eq!(second.lock().promised, 3);

        instances.done(5);
        let fresh = instances.create(5);
        assert_eq!(fresh.lock().promised, -1);
    }

    #[test]
    fn instance_watermark_is_monotonic() {
        let instances = Instances::<String>::new();
        let shared = instances.create(10);
        shared.lock().promised = 7;

        // Lowering the bound must not evict anything.
        instances.done(8);
        instances.done(3);
        assert_eq!(instances.create(10).lock().promised, 7);
    }

    #[test]
    fn decide_is_idempotent() {
        let decisions = Decisions::new();
        decisions.write(1, "a".to_owned());
        decisions.write(1, "b".to_owned());
        assert_eq!(decisions.read(1).as_deref(), Some("a"));
    }

    #[test]
    fn reclaimed_decisions_stay_reclaimed() {
        let decisions = Decisions::new();
        decisions.write(2, "x".to_owned());
        decisions.done(2);
        assert_eq!(decisions.read(2), None);
        decisions.write(2, "y".to_owned());
        assert_eq!(decisions.read(2), None);
        decisions.write(3, "z".to_owned());
        assert_eq!(decisions.read(3).as_deref(), Some("z"));
    }
}
