//! Thread-safe membership tracking.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// The set of ids this process believes are active.
///
/// The set itself is only reachable through the guard of a single mutex.
/// The private mutation helpers take `&mut BTreeSet<K>`, which can only be
/// obtained from that guard, so the set cannot be changed without holding
/// the lock.
#[derive(Debug)]
pub struct StateTracker<K> {
    tracked: Mutex<BTreeSet<K>>,
}

impl<K: Ord + Clone> StateTracker<K> {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            tracked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Start tracking every candidate not already tracked.
    ///
    /// Returns exactly the ids that were newly added.
    pub fn reconcile_adds<'a, I>(&self, candidates: I) -> BTreeSet<K>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut tracked = self.lock();
        let added: BTreeSet<K> = candidates
            .into_iter()
            .filter(|id| !tracked.contains(*id))
            .cloned()
            .collect();
        for id in &added {
            insert_tracked(&mut tracked, id.clone());
        }
        added
    }

    /// Stop tracking every id not present in `keep`.
    ///
    /// Returns exactly the ids that were removed.
    pub fn reconcile_removes<'a, I>(&self, keep: I) -> BTreeSet<K>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let keep: BTreeSet<&K> = keep.into_iter().collect();
        let mut tracked = self.lock();
        let removed: BTreeSet<K> = tracked
            .iter()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        for id in &removed {
            remove_tracked(&mut tracked, id);
        }
        removed
    }

    /// Point-in-time view of the tracked set.
    ///
    /// The snapshot holds the lock until it is dropped: other callers wait
    /// rather than observe a half-applied diff. Do not hold it across an
    /// `.await`.
    pub fn snapshot(&self) -> Snapshot<'_, K> {
        Snapshot { guard: self.lock() }
    }

    /// Whether `id` is currently tracked.
    pub fn contains(&self, id: &K) -> bool {
        self.lock().contains(id)
    }

    /// Number of tracked ids.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // A panic while the guard is held cannot leave the set half-written:
    // every helper is a single insert or remove.
    fn lock(&self) -> MutexGuard<'_, BTreeSet<K>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Ord + Clone> Default for StateTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_tracked<K: Ord>(tracked: &mut BTreeSet<K>, id: K) {
    let inserted = tracked.insert(id);
    debug_assert!(inserted, "id was already tracked");
}

fn remove_tracked<K: Ord>(tracked: &mut BTreeSet<K>, id: &K) {
    let removed = tracked.remove(id);
    debug_assert!(removed, "id was not tracked");
}

/// A locked, ordered view of the tracked set.
pub struct Snapshot<'a, K> {
    guard: MutexGuard<'a, BTreeSet<K>>,
}

impl<'a, K> Snapshot<'a, K> {
    /// Iterate over the tracked ids in order.
    pub fn iter(&self) -> std::collections::btree_set::Iter<'_, K> {
        self.guard.iter()
    }

    /// Number of ids in the snapshot.
    pub fn len(&self) -> usize {
        self.guard.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}

impl<'s, 'a, K> IntoIterator for &'s Snapshot<'a, K> {
    type Item = &'s K;
    type IntoIter = std::collections::btree_set::Iter<'s, K>;

    fn into_iter(self) -> Self::IntoIter {
        self.guard.iter()
    }
}
